use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::data::Message;
use crate::events::{ChatEvent, ChatEventBus};
use crate::file_transfer::FileTransferService;
use crate::group::GroupChatService;
use crate::manager::ConnectionManager;
use crate::message_service::MessageService;
use crate::store::ChatStore;

/// A bare-bones stand-in for [`crate::ChatNode`] with discovery and the TCP
/// accept loop left out: tests wire connections directly via
/// [`connect_pair`] instead of discovering peers over UDP.
pub struct TestNode {
    pub local_user_id: String,
    pub events: ChatEventBus,
    pub store: Arc<ChatStore>,
    pub manager: Arc<ConnectionManager>,
    pub transfers: Arc<FileTransferService>,
    pub messages: Arc<MessageService>,
    pub groups: Arc<GroupChatService>,
}

impl TestNode {
    pub async fn new(local_user_id: &str, download_dir: PathBuf) -> Self {
        let events = ChatEventBus::new();
        let store = Arc::new(ChatStore::connect_in_memory().await.unwrap());
        let (echo_tx, echo_rx) = mpsc::channel::<(String, String)>(16);
        let (inbound_tx, inbound_rx) = mpsc::channel::<(String, Vec<u8>)>(256);

        let manager = ConnectionManager::new(events.clone(), inbound_tx);
        let transfers = FileTransferService::new(
            manager.clone(),
            events.clone(),
            store.clone(),
            local_user_id.to_string(),
            download_dir.clone(),
            download_dir,
            true,
            true,
        );
        let groups = GroupChatService::new();
        let messages = MessageService::new(
            manager.clone(),
            transfers.clone(),
            store.clone(),
            groups.clone(),
            local_user_id.to_string(),
            events.clone(),
            echo_tx,
        );

        spawn_inbound_router(messages.clone(), inbound_rx);
        spawn_event_router(messages.clone(), manager.clone(), events.clone());
        spawn_echo_router(events.clone(), store.clone(), local_user_id.to_string(), echo_rx);

        Self {
            local_user_id: local_user_id.to_string(),
            events,
            store,
            manager,
            transfers,
            messages,
            groups,
        }
    }
}

fn spawn_inbound_router(messages: Arc<MessageService>, mut inbound_rx: mpsc::Receiver<(String, Vec<u8>)>) {
    tokio::spawn(async move {
        while let Some((peer_id, bytes)) = inbound_rx.recv().await {
            messages.on_message_received(&peer_id, &bytes).await;
        }
    });
}

/// Mirrors `ChatNode::spawn_event_router`: translates manager/connection
/// events into the `MessageService` callbacks that would otherwise be
/// wired by the composition root.
fn spawn_event_router(messages: Arc<MessageService>, manager: Arc<ConnectionManager>, events: ChatEventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ChatEvent::MessageSent { peer_id, local_sequence }) => {
                    messages.on_message_sent(&peer_id, local_sequence);
                }
                Ok(ChatEvent::MessageFailed { peer_id, local_sequence, .. }) => {
                    messages.on_message_failed(&peer_id, local_sequence);
                }
                Ok(ChatEvent::PeerOffline { peer_id }) => {
                    manager.on_peer_offline(&peer_id);
                }
                Ok(ChatEvent::StateChanged { peer_id, new_state: crate::connection::ConnectionState::Reconnecting, .. }) => {
                    manager.reconnect(peer_id, None);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Mirrors `ChatNode::spawn_echo_router`.
fn spawn_echo_router(events: ChatEventBus, store: Arc<ChatStore>, local_user_id: String, mut echo_rx: mpsc::Receiver<(String, String)>) {
    tokio::spawn(async move {
        while let Some((peer_id, content)) = echo_rx.recv().await {
            events.emit(ChatEvent::MessageReceived {
                peer_id: peer_id.clone(),
                payload: content.clone().into_bytes(),
            });
            events.emit(ChatEvent::MessageCreated {
                message_id: uuid::Uuid::new_v4().to_string(),
                kind: crate::events::MessageKind::Text,
            });
            let msg = Message::new_text(
                uuid::Uuid::new_v4().to_string(),
                peer_id,
                local_user_id.clone(),
                content,
                chrono::Utc::now().timestamp_millis(),
            );
            store.append_message(&msg, &local_user_id).await;
        }
    });
}

/// Connects `from`'s manager to `to`'s manager over a real loopback TCP
/// socket: `to` accepts and labels the connection `from_name_at_to`; `from`
/// dials out and labels it `to_name_at_from`. Mirrors the production path of
/// `ConnectionManager::add_incoming` (accept loop) paired with
/// `connect_to_peer` (outbound), without going through UDP discovery.
pub async fn connect_pair(from: &TestNode, to_name_at_from: &str, to: &TestNode, from_name_at_to: &str) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_manager = to.manager.clone();
    let accept_peer_id = from_name_at_to.to_string();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            accept_manager.add_incoming(accept_peer_id, stream).await;
        }
    });

    from.manager.connect_to_peer(to_name_at_from.to_string(), addr).await.unwrap();
    // Let the accept + adopt_stream settle before the caller starts sending.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
