//! `rusqlite`-backed [`HistoryStore`]: append-only chat history with
//! edit-by-platform-id updates (spec.md §6 "Persisted state layout").
//!
//! `rusqlite` runs synchronous/blocking calls, so every operation here goes
//! through `tokio::task::spawn_blocking`, mirroring how the teacher SDK
//! isolates blocking auth-token-store I/O from the async runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::error::BotError;
use crate::types::{ContextTurn, RoomMessage};

use super::{row_to_context_turn, HistoryRow, HistoryStore};

pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    pub fn open(path: &Path) -> Result<Self, BotError> {
        let conn = Connection::open(path)
            .map_err(|e| BotError::Store(format!("opening history db {}: {e}", path.display())))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, BotError> {
        let conn = Connection::open_in_memory().map_err(|e| BotError::Store(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<(), BotError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server TEXT NOT NULL,
                channel TEXT NOT NULL,
                nick TEXT NOT NULL,
                content TEXT NOT NULL,
                platform_id TEXT,
                created_at_epoch_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_arc ON messages(server, channel, created_at_epoch_ms);
            CREATE INDEX IF NOT EXISTS idx_messages_platform_id ON messages(platform_id);",
        )
        .map_err(|e| BotError::Store(format!("initializing schema: {e}")))
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn add_message(&self, message: &RoomMessage) -> Result<i64, BotError> {
        let conn = Arc::clone(&self.conn);
        let message = message.clone();
        let created_at = now_epoch_ms();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("history connection poisoned");
            conn.execute(
                "INSERT INTO messages (server, channel, nick, content, platform_id, created_at_epoch_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.arc.server_tag,
                    message.arc.channel_name,
                    message.nick,
                    message.content,
                    message.platform_id,
                    created_at,
                ],
            )
            .map_err(|e| BotError::Store(format!("inserting message: {e}")))?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| BotError::Store(format!("history task panicked: {e}")))?
    }

    async fn get_context_for_message(&self, message: &RoomMessage, size: usize) -> Result<Vec<ContextTurn>, BotError> {
        let rows = self.get_full_history(&message.arc.server_tag, &message.arc.channel_name).await?;
        let start = rows.len().saturating_sub(size);
        Ok(rows[start..].iter().map(|r| row_to_context_turn(r, &message.mynick)).collect())
    }

    async fn get_full_history(&self, server: &str, channel: &str) -> Result<Vec<HistoryRow>, BotError> {
        let conn = Arc::clone(&self.conn);
        let server = server.to_string();
        let channel = channel.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("history connection poisoned");
            let mut stmt = conn
                .prepare(
                    "SELECT id, server, channel, nick, content, platform_id, created_at_epoch_ms
                     FROM messages WHERE server = ?1 AND channel = ?2 ORDER BY id ASC",
                )
                .map_err(|e| BotError::Store(e.to_string()))?;
            let rows = stmt
                .query_map(params![server, channel], |row| {
                    Ok(HistoryRow {
                        id: row.get(0)?,
                        server: row.get(1)?,
                        channel: row.get(2)?,
                        nick: row.get(3)?,
                        content: row.get(4)?,
                        platform_id: row.get(5)?,
                        created_at_epoch_ms: row.get(6)?,
                    })
                })
                .map_err(|e| BotError::Store(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| BotError::Store(e.to_string()))?;
            Ok(rows)
        })
        .await
        .map_err(|e| BotError::Store(format!("history task panicked: {e}")))?
    }

    async fn count_messages_since(&self, server: &str, channel: &str, since_epoch_ms: i64) -> Result<i64, BotError> {
        let conn = Arc::clone(&self.conn);
        let server = server.to_string();
        let channel = channel.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("history connection poisoned");
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE server = ?1 AND channel = ?2 AND created_at_epoch_ms >= ?3",
                params![server, channel, since_epoch_ms],
                |row| row.get(0),
            )
            .map_err(|e| BotError::Store(e.to_string()))
        })
        .await
        .map_err(|e| BotError::Store(format!("history task panicked: {e}")))?
    }

    async fn get_message_id_by_platform_id(&self, platform_id: &str) -> Result<Option<i64>, BotError> {
        let conn = Arc::clone(&self.conn);
        let platform_id = platform_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("history connection poisoned");
            conn.query_row(
                "SELECT id FROM messages WHERE platform_id = ?1",
                params![platform_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(BotError::Store(other.to_string())),
            })
        })
        .await
        .map_err(|e| BotError::Store(format!("history task panicked: {e}")))?
    }

    async fn update_message_by_platform_id(&self, platform_id: &str, new_content: &str) -> Result<(), BotError> {
        let conn = Arc::clone(&self.conn);
        let platform_id = platform_id.to_string();
        let new_content = new_content.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("history connection poisoned");
            let updated = conn
                .execute(
                    "UPDATE messages SET content = ?1 WHERE platform_id = ?2",
                    params![new_content, platform_id],
                )
                .map_err(|e| BotError::Store(e.to_string()))?;
            if updated == 0 {
                return Err(BotError::Store(format!("no message with platform_id {platform_id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| BotError::Store(format!("history task panicked: {e}")))?
    }
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArcKey;

    #[tokio::test]
    async fn round_trips_messages_and_counts() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let arc = ArcKey::new("libera", "#test");
        store.add_message(&RoomMessage::new(arc.clone(), "alice", "bot", "hello")).await.unwrap();
        store.add_message(&RoomMessage::new(arc.clone(), "bot", "bot", "hi there")).await.unwrap();

        let history = store.get_full_history("libera", "#test").await.unwrap();
        assert_eq!(history.len(), 2);

        let context = store
            .get_context_for_message(&RoomMessage::new(arc, "alice", "bot", "again"), 10)
            .await
            .unwrap();
        assert_eq!(context.len(), 2);
    }

    #[tokio::test]
    async fn update_by_platform_id_edits_existing_row() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let arc = ArcKey::new("libera", "#test");
        let mut message = RoomMessage::new(arc, "bot", "bot", "draft");
        message.platform_id = Some("msg-1".into());
        store.add_message(&message).await.unwrap();

        store.update_message_by_platform_id("msg-1", "final").await.unwrap();
        let id = store.get_message_id_by_platform_id("msg-1").await.unwrap();
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn update_unknown_platform_id_errors() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let result = store.update_message_by_platform_id("missing", "x").await;
        assert!(result.is_err());
    }
}
