use sqlx::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "image" => MessageKind::Image,
            "file" => MessageKind::File,
            _ => MessageKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Sending,
        }
    }
}

/// An attachment's provenance: required together whenever `kind != Text`.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub local_path: String,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// A chat message, in-memory and persisted form.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub group_id: Option<String>,
    pub is_group: bool,
    pub kind: MessageKind,
    pub content: String,
    pub status: MessageStatus,
    pub is_read: bool,
    pub attachment: Option<Attachment>,
    pub timestamp_ms: i64,
}

impl Message {
    pub fn new_text(id: String, from: String, to: String, content: String, timestamp_ms: i64) -> Self {
        Self {
            id,
            from_user_id: from,
            to_user_id: to,
            group_id: None,
            is_group: false,
            kind: MessageKind::Text,
            content,
            status: MessageStatus::Sending,
            is_read: false,
            attachment: None,
            timestamp_ms,
        }
    }

    pub(crate) fn from_row(row: sqlx::sqlite::SqliteRow) -> Self {
        let attachment_path: Option<String> = row.get("attachment_path");
        let attachment = attachment_path.map(|local_path| Attachment {
            local_path,
            name: row.get("attachment_name"),
            size_bytes: row.get::<i64, _>("attachment_size") as u64,
            mime_type: row.get("attachment_mime_type"),
        });
        Self {
            id: row.get("id"),
            from_user_id: row.get("from_user_id"),
            to_user_id: row.get("to_user_id"),
            group_id: row.get("group_id"),
            is_group: row.get("is_group"),
            kind: MessageKind::from_str(row.get::<String, _>("kind").as_str()),
            content: row.get("content"),
            status: MessageStatus::from_str(row.get::<String, _>("status").as_str()),
            is_read: row.get("is_read"),
            attachment,
            timestamp_ms: row.get("timestamp"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub peer_id: String,
    pub last_timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: String,
    pub user_name: String,
    pub ip_address: String,
    pub port: u16,
    pub last_seen_ms: i64,
    pub is_online: bool,
}

/// `owner_id` is immutable once set, except by an explicit re-register.
#[derive(Debug, Clone)]
pub struct GroupMeta {
    pub group_id: String,
    pub owner_id: Option<String>,
    pub members: Vec<String>,
}

impl GroupMeta {
    /// Dedups and skips empty ids; preserves insertion order.
    pub(crate) fn add_member(&mut self, member: String) {
        if !member.is_empty() && !self.members.iter().any(|m| m == &member) {
            self.members.push(member);
        }
    }
}
