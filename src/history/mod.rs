//! History store contract (spec.md §6 "History store") plus a
//! `rusqlite`-backed adapter.
//!
//! The core depends only on `add_message`, `get_context_for_message`, and
//! `count_messages_since` (spec.md §6.1); the remaining operations exist so
//! a transport can resolve edits by platform id, matching the append-only
//! + edit-by-platform-id persisted layout spec.md §6 describes.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::BotError;
use crate::types::{ContextRole, ContextTurn, RoomMessage};

/// A persisted history row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub id: i64,
    pub server: String,
    pub channel: String,
    pub nick: String,
    pub content: String,
    pub platform_id: Option<String>,
    pub created_at_epoch_ms: i64,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn add_message(&self, message: &RoomMessage) -> Result<i64, BotError>;

    /// Last `size` rows for `message`'s arc, oldest first, formatted as
    /// context turns (spec.md §4.9 input to the agent).
    async fn get_context_for_message(&self, message: &RoomMessage, size: usize) -> Result<Vec<ContextTurn>, BotError>;

    async fn get_full_history(&self, server: &str, channel: &str) -> Result<Vec<HistoryRow>, BotError>;

    /// Count of rows for `(server, channel)` with `created_at_epoch_ms >= since_epoch_ms`.
    /// Used by the Proactive Runner's debounce-until-silence loop (spec.md §4.10).
    async fn count_messages_since(&self, server: &str, channel: &str, since_epoch_ms: i64) -> Result<i64, BotError>;

    async fn get_message_id_by_platform_id(&self, platform_id: &str) -> Result<Option<i64>, BotError>;

    async fn update_message_by_platform_id(&self, platform_id: &str, new_content: &str) -> Result<(), BotError>;
}

/// In-process row → context-turn formatting shared by every adapter: bot
/// messages (nick == mynick) become assistant turns, everything else a
/// user turn formatted `"<nick> content"` (spec.md §3 `RoomMessage::as_user_turn`).
pub fn row_to_context_turn(row: &HistoryRow, mynick: &str) -> ContextTurn {
    if row.nick == mynick {
        ContextTurn { role: ContextRole::Assistant, content: row.content.clone() }
    } else {
        ContextTurn { role: ContextRole::User, content: format!("<{}> {}", row.nick, row.content) }
    }
}

#[cfg(test)]
pub mod in_memory {
    //! Test-only in-memory `HistoryStore`, used by the core's test suite
    //! so it never depends on a real SQLite file.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryHistoryStore {
        rows: Mutex<Vec<HistoryRow>>,
        next_id: Mutex<i64>,
    }

    impl InMemoryHistoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl HistoryStore for InMemoryHistoryStore {
        async fn add_message(&self, message: &RoomMessage) -> Result<i64, BotError> {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            self.rows.lock().unwrap().push(HistoryRow {
                id,
                server: message.arc.server_tag.clone(),
                channel: message.arc.channel_name.clone(),
                nick: message.nick.clone(),
                content: message.content.clone(),
                platform_id: message.platform_id.clone(),
                created_at_epoch_ms: id,
            });
            Ok(id)
        }

        async fn get_context_for_message(&self, message: &RoomMessage, size: usize) -> Result<Vec<ContextTurn>, BotError> {
            let rows = self.rows.lock().unwrap();
            let matching: Vec<&HistoryRow> = rows
                .iter()
                .filter(|r| r.server == message.arc.server_tag && r.channel == message.arc.channel_name)
                .collect();
            let start = matching.len().saturating_sub(size);
            Ok(matching[start..]
                .iter()
                .map(|r| row_to_context_turn(r, &message.mynick))
                .collect())
        }

        async fn get_full_history(&self, server: &str, channel: &str) -> Result<Vec<HistoryRow>, BotError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.server == server && r.channel == channel)
                .cloned()
                .collect())
        }

        async fn count_messages_since(&self, server: &str, channel: &str, since_epoch_ms: i64) -> Result<i64, BotError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.server == server && r.channel == channel && r.created_at_epoch_ms >= since_epoch_ms)
                .count() as i64)
        }

        async fn get_message_id_by_platform_id(&self, platform_id: &str) -> Result<Option<i64>, BotError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.platform_id.as_deref() == Some(platform_id))
                .map(|r| r.id))
        }

        async fn update_message_by_platform_id(&self, platform_id: &str, new_content: &str) -> Result<(), BotError> {
            let mut rows = self.rows.lock().unwrap();
            match rows.iter_mut().find(|r| r.platform_id.as_deref() == Some(platform_id)) {
                Some(row) => {
                    row.content = new_content.to_string();
                    Ok(())
                }
                None => Err(BotError::Store(format!("no message with platform_id {platform_id}"))),
            }
        }
    }

    #[tokio::test]
    async fn context_is_bounded_by_size_and_oldest_first() {
        let store = InMemoryHistoryStore::new();
        let arc = crate::types::ArcKey::new("libera", "#test");
        for i in 0..5 {
            store
                .add_message(&RoomMessage::new(arc.clone(), "alice", "bot", format!("msg{i}")))
                .await
                .unwrap();
        }
        let context = store
            .get_context_for_message(&RoomMessage::new(arc, "alice", "bot", "latest"), 3)
            .await
            .unwrap();
        assert_eq!(context.len(), 3);
        assert!(context[0].content.contains("msg2"));
        assert!(context[2].content.contains("msg4"));
    }

    #[tokio::test]
    async fn count_messages_since_reflects_epoch_cutoff() {
        let store = InMemoryHistoryStore::new();
        let arc = crate::types::ArcKey::new("libera", "#test");
        for i in 0..5 {
            store
                .add_message(&RoomMessage::new(arc.clone(), "alice", "bot", format!("msg{i}")))
                .await
                .unwrap();
        }
        let count = store.count_messages_since("libera", "#test", 3).await.unwrap();
        assert_eq!(count, 2);
    }
}
