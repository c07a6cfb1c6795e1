use sqlx::{Row, sqlite::SqlitePoolOptions};
use tracing::warn;

use crate::data::{Message, PeerRecord, SessionSummary};

/// Persistent chat/session store, backed by a single sqlite file:
/// `CREATE TABLE IF NOT EXISTS` plus parameterized queries over a pool.
pub struct ChatStore {
    pool: sqlx::SqlitePool,
}

impl ChatStore {
    pub async fn connect(path: &std::path::Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Lazy, idempotent initialization; safe to call repeatedly.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT NOT NULL,
                local_user_id TEXT NOT NULL,
                peer_id TEXT NOT NULL,
                from_user_id TEXT NOT NULL,
                to_user_id TEXT NOT NULL,
                group_id TEXT,
                is_group INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL DEFAULT 'text',
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                attachment_name TEXT,
                attachment_size INTEGER,
                attachment_mime_type TEXT,
                attachment_path TEXT,
                timestamp INTEGER NOT NULL,
                insertion_order INTEGER PRIMARY KEY AUTOINCREMENT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_peer_ts \
             ON messages (local_user_id, peer_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_user_ts \
             ON messages (local_user_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        // (id, to_user_id) rather than id alone: one logical group message id
        // legitimately produces N rows, one per recipient.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_id_to \
             ON messages (id, to_user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                local_user_id TEXT NOT NULL,
                peer_id TEXT NOT NULL,
                last_timestamp INTEGER NOT NULL,
                PRIMARY KEY (local_user_id, peer_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS peers (
                local_user_id TEXT NOT NULL,
                peer_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                port INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                is_online INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (local_user_id, peer_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                group_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                member_id TEXT NOT NULL,
                PRIMARY KEY (group_id, member_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn derive_peer_id<'a>(msg: &'a Message, local_user_id: &str) -> &'a str {
        if msg.is_group {
            msg.group_id.as_deref().unwrap_or(&msg.to_user_id)
        } else if msg.from_user_id == local_user_id {
            &msg.to_user_id
        } else {
            &msg.from_user_id
        }
    }

    pub async fn append_message(&self, msg: &Message, local_user_id: &str) -> bool {
        let peer_id = Self::derive_peer_id(msg, local_user_id);
        let res = sqlx::query(
            r#"
            INSERT INTO messages
                (id, local_user_id, peer_id, from_user_id, to_user_id, group_id,
                 is_group, kind, content, status, is_read, attachment_name, attachment_size,
                 attachment_mime_type, attachment_path, timestamp)
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT (id, to_user_id) DO UPDATE SET
                local_user_id = excluded.local_user_id,
                peer_id = excluded.peer_id,
                from_user_id = excluded.from_user_id,
                group_id = excluded.group_id,
                is_group = excluded.is_group,
                kind = excluded.kind,
                content = excluded.content,
                status = excluded.status,
                is_read = excluded.is_read,
                attachment_name = excluded.attachment_name,
                attachment_size = excluded.attachment_size,
                attachment_mime_type = excluded.attachment_mime_type,
                attachment_path = excluded.attachment_path,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(&msg.id)
        .bind(local_user_id)
        .bind(peer_id)
        .bind(&msg.from_user_id)
        .bind(&msg.to_user_id)
        .bind(&msg.group_id)
        .bind(msg.is_group)
        .bind(msg.kind.as_str())
        .bind(&msg.content)
        .bind(msg.status.as_str())
        .bind(msg.is_read)
        .bind(msg.attachment.as_ref().map(|a| a.name.clone()))
        .bind(msg.attachment.as_ref().map(|a| a.size_bytes as i64))
        .bind(msg.attachment.as_ref().map(|a| a.mime_type.clone()))
        .bind(msg.attachment.as_ref().map(|a| a.local_path.clone()))
        .bind(msg.timestamp_ms)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => {
                self.touch_session(local_user_id, peer_id, msg.timestamp_ms).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "append_message failed");
                false
            }
        }
    }

    pub async fn load_messages(&self, local_user_id: &str, peer_id: &str) -> Vec<Message> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE local_user_id = ? AND peer_id = ? \
             ORDER BY timestamp ASC, insertion_order ASC",
        )
        .bind(local_user_id)
        .bind(peer_id)
        .fetch_all(&self.pool)
        .await;
        Self::rows_to_messages(rows)
    }

    pub async fn load_latest(&self, local_user_id: &str, peer_id: &str, n: i64) -> Vec<Message> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE local_user_id = ? AND peer_id = ? \
             ORDER BY timestamp DESC, insertion_order DESC LIMIT ?",
        )
        .bind(local_user_id)
        .bind(peer_id)
        .bind(n)
        .fetch_all(&self.pool)
        .await;
        let mut msgs = Self::rows_to_messages(rows);
        msgs.reverse();
        msgs
    }

    pub async fn load_before(
        &self,
        local_user_id: &str,
        peer_id: &str,
        before_ts: i64,
        n: i64,
    ) -> Vec<Message> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE local_user_id = ? AND peer_id = ? AND timestamp < ? \
             ORDER BY timestamp DESC, insertion_order DESC LIMIT ?",
        )
        .bind(local_user_id)
        .bind(peer_id)
        .bind(before_ts)
        .bind(n)
        .fetch_all(&self.pool)
        .await;
        let mut msgs = Self::rows_to_messages(rows);
        msgs.reverse();
        msgs
    }

    pub async fn search_keyword(
        &self,
        local_user_id: &str,
        keyword: &str,
        peer_id: Option<&str>,
        limit: i64,
    ) -> Vec<Message> {
        let pattern = format!("%{keyword}%");
        let rows = if let Some(peer_id) = peer_id {
            sqlx::query(
                "SELECT * FROM messages WHERE local_user_id = ? AND peer_id = ? \
                 AND content LIKE ? ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(local_user_id)
            .bind(peer_id)
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT * FROM messages WHERE local_user_id = ? AND content LIKE ? \
                 ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(local_user_id)
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        };
        Self::rows_to_messages(rows)
    }

    pub async fn search_all(
        &self,
        local_user_id: &str,
        peer_id: Option<&str>,
        limit: i64,
    ) -> Vec<Message> {
        let rows = if let Some(peer_id) = peer_id {
            sqlx::query(
                "SELECT * FROM messages WHERE local_user_id = ? AND peer_id = ? \
                 ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(local_user_id)
            .bind(peer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT * FROM messages WHERE local_user_id = ? ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(local_user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        };
        Self::rows_to_messages(rows)
    }

    pub async fn touch_session(&self, local_user_id: &str, peer_id: &str, last_ts: i64) {
        let res = sqlx::query(
            r#"
            INSERT INTO sessions (local_user_id, peer_id, last_timestamp)
            VALUES (?,?,?)
            ON CONFLICT (local_user_id, peer_id)
            DO UPDATE SET last_timestamp = excluded.last_timestamp
                WHERE excluded.last_timestamp > sessions.last_timestamp
            "#,
        )
        .bind(local_user_id)
        .bind(peer_id)
        .bind(last_ts)
        .execute(&self.pool)
        .await;
        if let Err(e) = res {
            warn!(error = %e, "touch_session failed");
        }
    }

    pub async fn load_sessions(&self, local_user_id: &str) -> Vec<SessionSummary> {
        let rows = sqlx::query(
            "SELECT peer_id, last_timestamp FROM sessions WHERE local_user_id = ? \
             ORDER BY last_timestamp DESC",
        )
        .bind(local_user_id)
        .fetch_all(&self.pool)
        .await;
        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|r| SessionSummary {
                    peer_id: r.get("peer_id"),
                    last_timestamp_ms: r.get("last_timestamp"),
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "load_sessions failed");
                Vec::new()
            }
        }
    }

    pub async fn clear_history(&self, local_user_id: &str, peer_id: &str) -> bool {
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "clear_history failed to open transaction");
                return false;
            }
        };
        let res = async {
            sqlx::query("DELETE FROM messages WHERE local_user_id = ? AND peer_id = ?")
                .bind(local_user_id)
                .bind(peer_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM sessions WHERE local_user_id = ? AND peer_id = ?")
                .bind(local_user_id)
                .bind(peer_id)
                .execute(&mut *tx)
                .await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;
        match res {
            Ok(()) => tx.commit().await.is_ok(),
            Err(e) => {
                warn!(error = %e, "clear_history failed");
                let _ = tx.rollback().await;
                false
            }
        }
    }

    pub async fn upsert_peer(&self, local_user_id: &str, peer: &PeerRecord) -> bool {
        let res = sqlx::query(
            r#"
            INSERT INTO peers (local_user_id, peer_id, user_name, ip_address, port, last_seen, is_online)
            VALUES (?,?,?,?,?,?,?)
            ON CONFLICT (local_user_id, peer_id) DO UPDATE SET
                user_name = excluded.user_name,
                ip_address = excluded.ip_address,
                port = excluded.port,
                last_seen = excluded.last_seen,
                is_online = excluded.is_online
            "#,
        )
        .bind(local_user_id)
        .bind(&peer.peer_id)
        .bind(&peer.user_name)
        .bind(&peer.ip_address)
        .bind(peer.port as i64)
        .bind(peer.last_seen_ms)
        .bind(peer.is_online)
        .execute(&self.pool)
        .await;
        if let Err(e) = &res {
            warn!(error = %e, "upsert_peer failed");
        }
        res.is_ok()
    }

    pub async fn load_peer(&self, local_user_id: &str, peer_id: &str) -> Option<PeerRecord> {
        let row = sqlx::query(
            "SELECT peer_id, user_name, ip_address, port, last_seen, is_online \
             FROM peers WHERE local_user_id = ? AND peer_id = ?",
        )
        .bind(local_user_id)
        .bind(peer_id)
        .fetch_optional(&self.pool)
        .await;
        match row {
            Ok(Some(r)) => Some(PeerRecord {
                peer_id: r.get("peer_id"),
                user_name: r.get("user_name"),
                ip_address: r.get("ip_address"),
                port: r.get::<i64, _>("port") as u16,
                last_seen_ms: r.get("last_seen"),
                is_online: r.get("is_online"),
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "load_peer failed");
                None
            }
        }
    }

    fn rows_to_messages(rows: sqlx::Result<Vec<sqlx::sqlite::SqliteRow>>) -> Vec<Message> {
        match rows {
            Ok(rows) => rows.into_iter().map(Message::from_row).collect(),
            Err(e) => {
                warn!(error = %e, "query failed");
                Vec::new()
            }
        }
    }
}
