//! Core engine of the LAN chat node: UDP discovery, TCP connection
//! lifecycle, priority-queued send, text/file/group message services, and
//! the persistent chat store. One [`ChatNode`] is the composition root a
//! caller (the `chatd` binary, or an embedding application) constructs once.

pub mod accel;
pub mod config;
pub mod connection;
pub mod data;
pub mod discovery;
pub mod echo;
pub mod error;
pub mod events;
pub mod file_transfer;
pub mod group;
pub mod iface;
pub mod logging;
pub mod manager;
pub mod message_service;
pub mod search;
pub mod spawn_utils;
pub mod store;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use accel::{ImageClassifier, TextEmbedder};
use config::Identity;
use connection::ConnectionState;
use discovery::{DEFAULT_DISCOVERY_PORT, DiscoveryService};
use events::{ChatEvent, ChatEventBus};
use file_transfer::FileTransferService;
use group::GroupChatService;
use iface::NetworkInterfaceCache;
use manager::{ConnectionManager, Priority};
use message_service::MessageService;
use search::SearchService;
use spawn_utils::spawn;
use store::ChatStore;

pub struct ChatNodeOptions {
    pub identity: Identity,
    pub download_dirs: config::DownloadDirs,
    pub tcp_port: u16,
    pub discovery_port: u16,
    pub loopback_discovery: bool,
    pub chat_history_db: PathBuf,
    pub auto_accept_images: bool,
    pub auto_accept_files: bool,
    pub image_classifier: Option<Arc<dyn ImageClassifier>>,
    pub text_embedder: Option<Arc<dyn TextEmbedder>>,
    pub nsfw_block_incoming: bool,
    pub nsfw_threshold: f32,
}

impl Default for ChatNodeOptions {
    fn default() -> Self {
        Self {
            identity: Identity {
                local_user_id: uuid::Uuid::new_v4().to_string(),
                user_name: gethostname::gethostname().to_string_lossy().into_owned(),
            },
            download_dirs: config::DownloadDirs {
                images: std::env::temp_dir(),
                files: std::env::temp_dir(),
            },
            tcp_port: 0,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            loopback_discovery: false,
            chat_history_db: config::chat_history_db_path()
                .unwrap_or_else(|| PathBuf::from("chat_history.db")),
            auto_accept_images: true,
            auto_accept_files: false,
            image_classifier: None,
            text_embedder: None,
            nsfw_block_incoming: false,
            nsfw_threshold: 0.8,
        }
    }
}

/// Owns every long-lived service and the single cancellation token that
/// tears them down in reverse construction order, replacing the source's
/// scattered singletons with one explicit composition root.
pub struct ChatNode {
    pub identity: Identity,
    pub store: Arc<ChatStore>,
    pub manager: Arc<ConnectionManager>,
    pub discovery: Arc<DiscoveryService>,
    pub messages: Arc<MessageService>,
    pub transfers: Arc<FileTransferService>,
    pub groups: Arc<GroupChatService>,
    pub search: Arc<SearchService>,
    pub iface_cache: Arc<NetworkInterfaceCache>,
    pub events: ChatEventBus,
    local_tcp_port: std::sync::OnceLock<u16>,
    cancel: CancellationToken,
}

impl ChatNode {
    pub async fn start(opts: ChatNodeOptions) -> anyhow::Result<Arc<Self>> {
        let events = ChatEventBus::new();
        let store = Arc::new(ChatStore::connect(&opts.chat_history_db).await?);
        let iface_cache = NetworkInterfaceCache::new();

        let (echo_tx, echo_rx) = mpsc::channel::<(String, String)>(16);
        let (inbound_tx, inbound_rx) = mpsc::channel::<(String, Vec<u8>)>(256);

        let manager = ConnectionManager::new(events.clone(), inbound_tx);
        let transfers = FileTransferService::with_nsfw_gate(
            manager.clone(),
            events.clone(),
            store.clone(),
            opts.identity.local_user_id.clone(),
            opts.download_dirs.images.clone(),
            opts.download_dirs.files.clone(),
            opts.auto_accept_images,
            opts.auto_accept_files,
            opts.image_classifier,
            opts.nsfw_block_incoming,
            opts.nsfw_threshold,
        );
        let groups = GroupChatService::new();
        let messages = MessageService::new(
            manager.clone(),
            transfers.clone(),
            store.clone(),
            groups.clone(),
            opts.identity.local_user_id.clone(),
            events.clone(),
            echo_tx,
        );
        let search = SearchService::new(store.clone(), opts.text_embedder);

        let discovery = DiscoveryService::bind(
            opts.identity.clone(),
            opts.tcp_port,
            opts.discovery_port,
            opts.loopback_discovery,
            iface_cache.clone(),
            events.clone(),
        )
        .await?;
        discovery.start();

        let listener = TcpListener::bind(("0.0.0.0", opts.tcp_port)).await?;
        let local_tcp_port = listener.local_addr()?.port();

        let node = Arc::new(Self {
            identity: opts.identity,
            store,
            manager,
            discovery,
            messages,
            transfers,
            groups,
            search,
            iface_cache,
            events,
            local_tcp_port: std::sync::OnceLock::new(),
            cancel: CancellationToken::new(),
        });
        let _ = node.local_tcp_port.set(local_tcp_port);

        node.clone().spawn_accept_loop(listener);
        node.clone().spawn_event_router();
        node.clone().spawn_echo_router(echo_rx);
        node.clone().spawn_inbound_router(inbound_rx);

        info!(tcp_port = local_tcp_port, "chat node started");
        Ok(node)
    }

    pub fn local_tcp_port(&self) -> u16 {
        *self.local_tcp_port.get().unwrap_or(&0)
    }

    fn spawn_accept_loop(self: Arc<Self>, listener: TcpListener) {
        let cancel = self.cancel.clone();
        spawn("tcp-accept", async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = listener.accept() => {
                        match res {
                            Ok((stream, addr)) => self.on_accept(stream, addr).await,
                            Err(e) => warn!(error = %e, "accept failed"),
                        }
                    }
                }
            }
            Ok(())
        });
    }

    async fn on_accept(self: &Arc<Self>, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let peer_id = self
            .discovery
            .peer_id_for_addr(&addr.ip())
            .unwrap_or_else(|| addr.to_string());
        self.manager.add_incoming(peer_id, stream).await;
    }

    /// Translates manager/connection events into service callbacks,
    /// replacing the source's signal/slot wiring.
    fn spawn_event_router(self: Arc<Self>) {
        let mut rx = self.events.subscribe();
        let node = self.clone();
        spawn("event-router", async move {
            loop {
                match rx.recv().await {
                    Ok(ChatEvent::MessageSent { peer_id, local_sequence }) => {
                        node.messages.on_message_sent(&peer_id, local_sequence);
                    }
                    Ok(ChatEvent::MessageFailed { peer_id, local_sequence, .. }) => {
                        node.messages.on_message_failed(&peer_id, local_sequence);
                    }
                    Ok(ChatEvent::PeerOffline { peer_id }) => {
                        node.manager.on_peer_offline(&peer_id);
                    }
                    Ok(ChatEvent::StateChanged { peer_id, new_state: ConnectionState::Reconnecting, .. }) => {
                        let fallback = node
                            .discovery
                            .known_peer(&peer_id)
                            .and_then(|(ip, port)| ip.parse().ok().map(|ip| SocketAddr::new(ip, port)));
                        node.manager.reconnect(peer_id, fallback);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            Ok(())
        });
    }

    fn spawn_echo_router(self: Arc<Self>, mut echo_rx: mpsc::Receiver<(String, String)>) {
        let node = self.clone();
        spawn("echo-router", async move {
            while let Some((peer_id, content)) = echo_rx.recv().await {
                node.events.emit(ChatEvent::MessageReceived {
                    peer_id: peer_id.clone(),
                    payload: content.clone().into_bytes(),
                });
                node.events.emit(ChatEvent::MessageCreated {
                    message_id: uuid::Uuid::new_v4().to_string(),
                    kind: events::MessageKind::Text,
                });
                let msg = data::Message::new_text(
                    uuid::Uuid::new_v4().to_string(),
                    peer_id,
                    node.identity.local_user_id.clone(),
                    content,
                    chrono::Utc::now().timestamp_millis(),
                );
                node.store.append_message(&msg, &node.identity.local_user_id).await;
            }
            Ok(())
        });
    }

    fn spawn_inbound_router(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<(String, Vec<u8>)>) {
        let node = self.clone();
        spawn("inbound-router", async move {
            while let Some((peer_id, bytes)) = inbound_rx.recv().await {
                node.messages.on_message_received(&peer_id, &bytes).await;
            }
            Ok(())
        });
    }

    pub async fn send_text(self: &Arc<Self>, peer_id: &str, content: &str) -> Option<String> {
        self.messages.send_text(peer_id, content).await
    }

    pub async fn send_group_text(self: &Arc<Self>, group_id: &str, members: &[String], content: &str) -> String {
        self.messages.send_group_text(group_id, members, content).await
    }

    pub async fn connect_to_peer(self: &Arc<Self>, peer_id: &str, addr: SocketAddr) -> Result<(), error::Error> {
        self.manager.connect_to_peer(peer_id.to_string(), addr).await
    }

    pub fn state(&self, peer_id: &str) -> ConnectionState {
        self.manager.state(peer_id)
    }

    pub async fn enqueue_raw(self: &Arc<Self>, peer_id: &str, bytes: Vec<u8>, priority: Priority) -> u64 {
        self.manager.send(peer_id, bytes, priority).await
    }

    /// Tears down discovery, then every spawned task, in reverse
    /// construction order.
    pub async fn shutdown(&self) {
        self.discovery.stop().await;
        self.cancel.cancel();
    }
}
