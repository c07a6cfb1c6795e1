use std::collections::HashMap;
use std::sync::Arc;

use chat_wire::{TcpMessage, TcpMessageKind, TextMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::data::{Message, MessageStatus};
use crate::echo::{ECHO_PEER_ID, EchoSimulator};
use crate::events::{ChatEvent, ChatEventBus};
use crate::file_transfer::FileTransferService;
use crate::group::GroupChatService;
use crate::manager::{ConnectionManager, Priority};
use crate::store::ChatStore;

pub struct MessageService {
    manager: Arc<ConnectionManager>,
    transfers: Arc<FileTransferService>,
    store: Arc<ChatStore>,
    groups: Arc<GroupChatService>,
    local_user_id: String,
    events: ChatEventBus,
    echo: EchoSimulator,
    pending: Mutex<HashMap<(String, u64), Message>>,
}

impl MessageService {
    pub fn new(
        manager: Arc<ConnectionManager>,
        transfers: Arc<FileTransferService>,
        store: Arc<ChatStore>,
        groups: Arc<GroupChatService>,
        local_user_id: String,
        events: ChatEventBus,
        echo_inbound: mpsc::Sender<(String, String)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            transfers,
            store,
            groups,
            local_user_id,
            events,
            echo: EchoSimulator::spawn(echo_inbound),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub async fn send_text(self: &Arc<Self>, peer_id: &str, content: &str) -> Option<String> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let mut msg = Message::new_text(
            id.clone(),
            self.local_user_id.clone(),
            peer_id.to_string(),
            content.to_string(),
            now,
        );

        if peer_id == ECHO_PEER_ID {
            msg.status = MessageStatus::Sent;
            self.store.append_message(&msg, &self.local_user_id).await;
            self.echo.echo(content.to_string());
            return Some(id);
        }

        let text = TextMessage {
            message_id: id.clone(),
            from_user_id: msg.from_user_id.clone(),
            to_user_id: msg.to_user_id.clone(),
            content: msg.content.clone(),
            timestamp_ms: now,
            is_group: false,
            group_ids: Vec::new(),
        };
        self.dispatch_text(peer_id, text, msg, Priority::High).await;
        Some(id)
    }

    /// One logical message id shared across all per-recipient sends.
    pub async fn send_group_text(self: &Arc<Self>, group_id: &str, members: &[String], content: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        for member in members {
            let mut msg = Message::new_text(id.clone(), self.local_user_id.clone(), member.clone(), content.to_string(), now);
            msg.is_group = true;
            msg.group_id = Some(group_id.to_string());
            let text = TextMessage {
                message_id: id.clone(),
                from_user_id: msg.from_user_id.clone(),
                to_user_id: member.clone(),
                content: content.to_string(),
                timestamp_ms: now,
                is_group: true,
                group_ids: vec![group_id.to_string()],
            };
            self.dispatch_text(member, text, msg, Priority::High).await;
        }
        id
    }

    /// Rebroadcasts a message received from one group member to the rest,
    /// preserving id/from/group_id/content/timestamp; only `to_user_id` changes.
    pub async fn relay_group_text(self: &Arc<Self>, original: &Message, relay_targets: &[String]) {
        let group_id = original.group_id.clone().unwrap_or_default();
        for target in relay_targets {
            let mut msg = original.clone();
            msg.to_user_id = target.clone();
            let text = TextMessage {
                message_id: original.id.clone(),
                from_user_id: original.from_user_id.clone(),
                to_user_id: target.clone(),
                content: original.content.clone(),
                timestamp_ms: original.timestamp_ms,
                is_group: true,
                group_ids: vec![group_id.clone()],
            };
            self.dispatch_text(target, text, msg, Priority::High).await;
        }
    }

    async fn dispatch_text(self: &Arc<Self>, peer_id: &str, text: TextMessage, msg: Message, priority: Priority) {
        let payload = match text_payload(&text) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode text message");
                return;
            }
        };
        let local_sequence = self.manager.reserve_sequence();
        self.pending.lock().insert((peer_id.to_string(), local_sequence), msg.clone());
        self.manager.send_with_id(local_sequence, peer_id, payload, priority).await;
    }

    /// Wired to `ConnectionManager`'s `message_sent`/`message_failed` events.
    pub fn on_message_sent(&self, peer_id: &str, local_sequence: u64) {
        if let Some(mut msg) = self.pending.lock().remove(&(peer_id.to_string(), local_sequence)) {
            msg.status = MessageStatus::Sent;
            let store = self.store.clone();
            let local_user_id = self.local_user_id.clone();
            tokio::spawn(async move {
                store.append_message(&msg, &local_user_id).await;
            });
        }
    }

    pub fn on_message_failed(&self, peer_id: &str, local_sequence: u64) {
        if let Some(mut msg) = self.pending.lock().remove(&(peer_id.to_string(), local_sequence)) {
            msg.status = MessageStatus::Failed;
            let store = self.store.clone();
            let local_user_id = self.local_user_id.clone();
            tokio::spawn(async move {
                store.append_message(&msg, &local_user_id).await;
            });
        }
    }

    /// Dispatched by the inbound router once a frame is off the wire.
    pub async fn on_message_received(self: &Arc<Self>, peer_id: &str, bytes: &[u8]) {
        let frame = match TcpMessage::decode(bytes) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(peer_id, error = %e, "malformed frame, skipping");
                return;
            }
        };
        match frame.kind {
            TcpMessageKind::Text => {
                let text = match bincode::serde::decode_from_slice::<TextMessage, _>(
                    &frame.payload,
                    bincode::config::standard(),
                ) {
                    Ok((t, _)) => t,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed text payload, skipping");
                        return;
                    }
                };
                let mut msg = Message::new_text(
                    text.message_id,
                    text.from_user_id,
                    text.to_user_id,
                    text.content,
                    text.timestamp_ms,
                );
                msg.status = MessageStatus::Delivered;
                msg.is_group = text.is_group;
                msg.group_id = text.group_ids.first().cloned();
                self.store.append_message(&msg, &self.local_user_id).await;
                self.events.emit(ChatEvent::MessageCreated {
                    message_id: msg.id.clone(),
                    kind: crate::events::MessageKind::Text,
                });

                if msg.is_group {
                    if let Some(group_id) = msg.group_id.clone() {
                        let targets = self.groups.get_relay_targets(
                            &group_id,
                            &self.local_user_id,
                            &msg.from_user_id,
                            &msg.to_user_id,
                        );
                        if !targets.is_empty() {
                            self.relay_group_text(&msg, &targets).await;
                        }
                    }
                }
            }
            TcpMessageKind::FileRequest | TcpMessageKind::FileChunk => {
                self.transfers.on_frame(peer_id, frame).await;
            }
        }
    }
}

fn text_payload(text: &TextMessage) -> Result<Vec<u8>, chat_wire::CodecError> {
    let payload = bincode::serde::encode_to_vec(text, bincode::config::standard())
        .map_err(chat_wire::CodecError::EncodeFailed)?;
    TcpMessage::new(TcpMessageKind::Text, 0, payload, chrono::Utc::now().timestamp_millis()).encode()
}
