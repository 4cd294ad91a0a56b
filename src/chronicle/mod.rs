//! Minimal chronicle store (spec.md §1 "chat-history persistence, chronicle
//! store, auto-chronicler" — out of scope beyond the one call site the
//! Session Coordinator's passive path uses). An arc's conversation is
//! chaptered into paragraphs; this crate only needs to append one.

pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::coordinator::AutoChronicler;
use crate::error::BotError;
use crate::types::{ArcKey, RoomMessage};

/// One appended unit of chronicle text for an arc's current chapter.
#[async_trait]
pub trait ChronicleStore: Send + Sync {
    async fn append_paragraph(&self, arc: &ArcKey, author: &str, text: &str) -> Result<(), BotError>;
}

/// Adapts a [`ChronicleStore`] into the Coordinator's passive-path
/// auto-chronicler hook (spec.md §4.7.2).
pub struct ChronicleAutoChronicler {
    store: Arc<dyn ChronicleStore>,
}

impl ChronicleAutoChronicler {
    pub fn new(store: Arc<dyn ChronicleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AutoChronicler for ChronicleAutoChronicler {
    async fn on_passive_message(&self, message: &RoomMessage) {
        if let Err(error) = self.store.append_paragraph(&message.arc, &message.nick, &message.content).await {
            tracing::warn!(%error, "auto-chronicler: failed to append passive message");
        }
    }
}
