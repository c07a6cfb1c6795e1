use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chat_wire::{FileChunk, FileTransferRequest, TcpMessage, TcpMessageKind};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::accel::ImageClassifier;
use crate::data::{Attachment, Message, MessageKind, MessageStatus};
use crate::events::{ChatEvent, ChatEventBus};
use crate::manager::{ConnectionManager, Priority};
use crate::store::ChatStore;

pub const CHUNK_SIZE: usize = 1 << 20;
pub const MAX_FILE_SIZE: u64 = 200 * (1 << 20);

struct OutgoingTransfer {
    transfer_id: String,
}

struct IncomingTransfer {
    request: FileTransferRequest,
    accepted: bool,
    local_path: PathBuf,
    bytes_written: u64,
}

/// Implements the two-phase transfer (announce then chunks), accept/reject
/// policy, and the optional NSFW gating hook.
pub struct FileTransferService {
    manager: Arc<ConnectionManager>,
    events: ChatEventBus,
    store: Arc<ChatStore>,
    local_user_id: String,
    images_dir: PathBuf,
    files_dir: PathBuf,
    auto_accept_images: bool,
    auto_accept_files: bool,
    classifier: Option<Arc<dyn ImageClassifier>>,
    nsfw_block_incoming: bool,
    nsfw_threshold: f32,
    outgoing: Mutex<HashMap<String, OutgoingTransfer>>,
    incoming: Mutex<HashMap<String, IncomingTransfer>>,
}

impl FileTransferService {
    pub fn new(
        manager: Arc<ConnectionManager>,
        events: ChatEventBus,
        store: Arc<ChatStore>,
        local_user_id: String,
        images_dir: PathBuf,
        files_dir: PathBuf,
        auto_accept_images: bool,
        auto_accept_files: bool,
    ) -> Arc<Self> {
        Self::with_nsfw_gate(
            manager,
            events,
            store,
            local_user_id,
            images_dir,
            files_dir,
            auto_accept_images,
            auto_accept_files,
            None,
            false,
            0.8,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_nsfw_gate(
        manager: Arc<ConnectionManager>,
        events: ChatEventBus,
        store: Arc<ChatStore>,
        local_user_id: String,
        images_dir: PathBuf,
        files_dir: PathBuf,
        auto_accept_images: bool,
        auto_accept_files: bool,
        classifier: Option<Arc<dyn ImageClassifier>>,
        nsfw_block_incoming: bool,
        nsfw_threshold: f32,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            events,
            store,
            local_user_id,
            images_dir,
            files_dir,
            auto_accept_images,
            auto_accept_files,
            classifier,
            nsfw_block_incoming,
            nsfw_threshold,
            outgoing: Mutex::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
        })
    }

    /// Rejected synchronously if `file_size` exceeds the 200 MiB cap.
    pub async fn send_file(
        self: &Arc<Self>,
        peer_id: &str,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<String, crate::error::Error> {
        if bytes.len() as u64 > MAX_FILE_SIZE {
            return Err(crate::error::Error::TransferLifecycle("file too large".into()));
        }

        let transfer_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let file_hash = hex::encode(hasher.finalize());

        let request = FileTransferRequest {
            transfer_id: transfer_id.clone(),
            from_user_id: self.local_user_id.clone(),
            to_user_id: peer_id.to_string(),
            file_name: file_name.to_string(),
            file_size: bytes.len() as u64,
            file_hash: Some(file_hash),
            timestamp_ms: now,
            mime_type: mime_type.to_string(),
        };
        self.outgoing.lock().insert(
            transfer_id.clone(),
            OutgoingTransfer {
                transfer_id: transfer_id.clone(),
            },
        );

        self.send_frame(peer_id, TcpMessageKind::FileRequest, &request, now).await?;

        for (i, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
            let offset = (i * CHUNK_SIZE) as u64;
            let is_last = offset + chunk.len() as u64 == bytes.len() as u64;
            let chunk_msg = FileChunk {
                transfer_id: transfer_id.clone(),
                offset,
                data: chunk.to_vec(),
                chunk_size: chunk.len() as u32,
                is_last,
            };
            self.send_frame(peer_id, TcpMessageKind::FileChunk, &chunk_msg, now).await?;
        }

        Ok(transfer_id)
    }

    async fn send_frame<T: serde::Serialize>(
        &self,
        peer_id: &str,
        kind: TcpMessageKind,
        payload: &T,
        now: i64,
    ) -> Result<(), crate::error::Error> {
        let encoded = bincode::serde::encode_to_vec(payload, bincode::config::standard())
            .map_err(|e| crate::error::Error::Codec(e.to_string()))?;
        let framed = TcpMessage::new(kind, 0, encoded, now).encode()?;
        self.manager.send(peer_id, framed, Priority::Normal).await;
        Ok(())
    }

    /// Dispatched by the message service for `FILE_REQUEST`/`FILE_CHUNK` frames.
    pub async fn on_frame(self: &Arc<Self>, peer_id: &str, frame: TcpMessage) {
        match frame.kind {
            TcpMessageKind::FileRequest => {
                let request = match bincode::serde::decode_from_slice::<FileTransferRequest, _>(
                    &frame.payload,
                    bincode::config::standard(),
                ) {
                    Ok((r, _)) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed file request");
                        return;
                    }
                };
                self.on_file_request(request).await;
            }
            TcpMessageKind::FileChunk => {
                let chunk = match bincode::serde::decode_from_slice::<FileChunk, _>(
                    &frame.payload,
                    bincode::config::standard(),
                ) {
                    Ok((c, _)) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed file chunk");
                        return;
                    }
                };
                self.on_file_chunk(chunk).await;
            }
            TcpMessageKind::Text => {
                let _ = peer_id;
            }
        }
    }

    fn is_image(mime_type: &str) -> bool {
        mime_type.starts_with("image/")
    }

    async fn on_file_request(self: &Arc<Self>, request: FileTransferRequest) {
        let is_image = Self::is_image(&request.mime_type);
        let accepted = if is_image { self.auto_accept_images } else { self.auto_accept_files };

        let dir = if is_image { &self.images_dir } else { &self.files_dir };
        let local_path = dir.join(&request.file_name);
        self.events.emit(ChatEvent::IncomingTransferRequested {
            transfer_id: request.transfer_id.clone(),
            from_user_id: request.from_user_id.clone(),
            file_name: request.file_name.clone(),
        });

        if !accepted {
            self.events.emit(ChatEvent::TransferFailed {
                transfer_id: request.transfer_id.clone(),
                reason: "rejected".into(),
            });
        }

        self.incoming.lock().insert(
            request.transfer_id.clone(),
            IncomingTransfer {
                request,
                accepted,
                local_path,
                bytes_written: 0,
            },
        );
    }

    /// Streams each chunk to disk as it arrives rather than buffering the
    /// whole transfer in memory: a new file at offset 0, appended to after.
    async fn on_file_chunk(self: &Arc<Self>, chunk: FileChunk) {
        let (accepted, local_path) = {
            let incoming = self.incoming.lock();
            let Some(transfer) = incoming.get(&chunk.transfer_id) else {
                // Unknown transfer_id; chunks for an unaccepted transfer are
                // ignored but not errored (sender still considers them sent).
                return;
            };
            (transfer.accepted, transfer.local_path.clone())
        };
        if !accepted {
            return;
        }

        if chunk.offset == 0
            && let Some(parent) = local_path.parent()
        {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let write_result = async {
            let mut file = if chunk.offset == 0 {
                tokio::fs::File::create(&local_path).await?
            } else {
                tokio::fs::OpenOptions::new().append(true).open(&local_path).await?
            };
            file.write_all(&chunk.data).await
        }
        .await;

        if let Err(e) = write_result {
            self.incoming.lock().remove(&chunk.transfer_id);
            self.events.emit(ChatEvent::TransferFailed {
                transfer_id: chunk.transfer_id.clone(),
                reason: e.to_string(),
            });
            return;
        }

        let is_last = {
            let mut incoming = self.incoming.lock();
            let Some(transfer) = incoming.get_mut(&chunk.transfer_id) else {
                return;
            };
            transfer.bytes_written += chunk.data.len() as u64;
            chunk.is_last
        };

        if is_last {
            self.finalize_transfer(&chunk.transfer_id).await;
        }
    }

    async fn finalize_transfer(self: &Arc<Self>, transfer_id: &str) {
        let transfer = {
            let mut incoming = self.incoming.lock();
            incoming.remove(transfer_id)
        };
        let Some(transfer) = transfer else { return };

        if self.nsfw_block_incoming
            && Self::is_image(&transfer.request.mime_type)
            && let Some(classifier) = &self.classifier
        {
            // The full file is on disk by now; score the bytes actually received.
            if let Some(score) = classifier.classify_image(&transfer.local_path)
                && score > self.nsfw_threshold
            {
                let _ = tokio::fs::remove_file(&transfer.local_path).await;
                self.events.emit(ChatEvent::TransferFailed {
                    transfer_id: transfer_id.to_string(),
                    reason: "nsfw blocked".into(),
                });
                return;
            }
        }

        let is_image = Self::is_image(&transfer.request.mime_type);
        let mut msg = Message::new_text(
            Uuid::new_v4().to_string(),
            transfer.request.from_user_id.clone(),
            transfer.request.to_user_id.clone(),
            transfer.request.file_name.clone(),
            transfer.request.timestamp_ms,
        );
        msg.kind = if is_image { MessageKind::Image } else { MessageKind::File };
        msg.status = MessageStatus::Delivered;
        msg.attachment = Some(Attachment {
            local_path: transfer.local_path.display().to_string(),
            name: transfer.request.file_name.clone(),
            size_bytes: transfer.bytes_written,
            mime_type: transfer.request.mime_type.clone(),
        });

        self.store.append_message(&msg, &self.local_user_id).await;
        self.events.emit(ChatEvent::MessageCreated {
            message_id: msg.id.clone(),
            kind: if is_image { crate::events::MessageKind::Image } else { crate::events::MessageKind::File },
        });
        self.events.emit(ChatEvent::TransferCompleted {
            transfer_id: transfer_id.to_string(),
            local_path: transfer.local_path.display().to_string(),
        });
    }
}
