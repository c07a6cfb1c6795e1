use serde::{Deserialize, Serialize};

/// Text message, plain or addressed to a group (`group_ids` non-empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub message_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub content: String,
    pub timestamp_ms: i64,
    pub is_group: bool,
    pub group_ids: Vec<String>,
}

/// Announces an incoming file before any chunk is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferRequest {
    pub transfer_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: Option<String>,
    pub timestamp_ms: i64,
    pub mime_type: String,
}

/// One chunk of a transfer in progress. Chunks are 1 MiB except possibly the last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub transfer_id: String,
    pub offset: u64,
    pub data: Vec<u8>,
    pub chunk_size: u32,
    pub is_last: bool,
}
