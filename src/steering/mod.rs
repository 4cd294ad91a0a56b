//! Steering Queue (spec.md §4.6): per-`SessionKey` FIFO of inbound
//! messages with compaction, drain-as-ephemeral-context, and wake/timeout.
//!
//! Grounded in the teacher SDK's per-key coordination idiom (one
//! `tokio::sync::Notify` + state map per owning key), the same shape as
//! [`crate::util::ArcLock`] generalized from "one critical section" to
//! "one FIFO of work items".
//!
//! **Not wired into `crate::coordinator::SessionCoordinator`.** §4.7's
//! dispatch algorithm is self-contained and never calls into this FIFO
//! (see the divergence note at the top of `coordinator/mod.rs` and
//! DESIGN.md "Resolved Open Questions #1"). This module implements §4.6's
//! contract completely and is fully covered by the tests below; it is kept
//! as a ready-to-use primitive for a caller that needs compaction/wake
//! semantics, which this crate's one caller (the Coordinator) does not.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;

use crate::error::BotError;
use crate::types::{ContextRole, ContextTurn, RoomMessage, SessionKey};

pub type SendResponseFn = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Command,
    Passive,
}

#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Finished,
    Failed(Arc<BotError>),
}

struct ItemState {
    outcome: Option<ItemOutcome>,
    notify: Notify,
}

pub struct QueuedItem {
    pub kind: ItemKind,
    pub message: RoomMessage,
    pub trigger_message_id: Option<String>,
    pub send_response: Option<SendResponseFn>,
    state: Mutex<ItemState>,
}

impl QueuedItem {
    fn new(
        kind: ItemKind,
        message: RoomMessage,
        trigger_message_id: Option<String>,
        send_response: Option<SendResponseFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            message,
            trigger_message_id,
            send_response,
            state: Mutex::new(ItemState {
                outcome: None,
                notify: Notify::new(),
            }),
        })
    }

    /// Mark this item finished successfully. No-op if already resolved
    /// (finished or failed) — spec.md §8 "double finishItem is a no-op".
    async fn finish(&self) {
        let mut state = self.state.lock().await;
        if state.outcome.is_none() {
            state.outcome = Some(ItemOutcome::Finished);
            state.notify.notify_waiters();
        }
    }

    /// Mark this item failed. No-op if already resolved — spec.md §8
    /// "failItem after finishItem is a no-op".
    async fn fail(&self, error: BotError) {
        let mut state = self.state.lock().await;
        if state.outcome.is_none() {
            state.outcome = Some(ItemOutcome::Failed(Arc::new(error)));
            state.notify.notify_waiters();
        }
    }

    pub async fn completion(&self) -> ItemOutcome {
        loop {
            let notified = {
                let state = self.state.lock().await;
                if let Some(outcome) = &state.outcome {
                    return outcome.clone();
                }
                state.notify.notified()
            };
            notified.await;
        }
    }

    fn is_eligible_for_compaction(&self) -> bool {
        match self.kind {
            ItemKind::Command => true,
            ItemKind::Passive => self.send_response.is_some(),
        }
    }
}

struct SessionEntry {
    items: VecDeque<Arc<QueuedItem>>,
    wake: Arc<Notify>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            wake: Arc::new(Notify::new()),
        }
    }
}

pub struct EnqueueCommandResult {
    pub is_runner: bool,
    pub key: SessionKey,
    pub item: Arc<QueuedItem>,
}

pub struct EnqueuePassiveResult {
    pub queued: bool,
    pub is_proactive_runner: bool,
    pub key: SessionKey,
    pub item: Option<Arc<QueuedItem>>,
}

pub enum WaitOutcome {
    Woken,
    Timeout,
}

pub struct CompactedWork {
    pub dropped: Vec<Arc<QueuedItem>>,
    pub next_item: Option<Arc<QueuedItem>>,
}

#[derive(Default)]
pub struct SteeringQueue {
    sessions: Mutex<HashMap<SessionKey, SessionEntry>>,
}

impl SteeringQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// If no session exists for `message`'s key, create one and mark this
    /// item as the runner (`is_runner = true`). Otherwise enqueue it as a
    /// command behind the running session.
    pub async fn enqueue_command_or_start_runner(
        &self,
        message: RoomMessage,
        trigger_message_id: Option<String>,
        send_response: Option<SendResponseFn>,
    ) -> EnqueueCommandResult {
        let key = SessionKey::for_message(&message);
        let item = QueuedItem::new(ItemKind::Command, message, trigger_message_id, send_response);

        let mut sessions = self.sessions.lock().await;
        let is_runner = !sessions.contains_key(&key);
        let entry = sessions.entry(key.clone()).or_insert_with(SessionEntry::new);
        if !is_runner {
            entry.items.push_back(Arc::clone(&item));
            entry.wake.notify_waiters();
        }

        EnqueueCommandResult { is_runner, key, item }
    }

    /// If a session exists, enqueue as passive (`queued = true`). Else, if
    /// `start_proactive`, create a session and report
    /// `is_proactive_runner = true`. Otherwise the message is dropped.
    pub async fn enqueue_passive(
        &self,
        message: RoomMessage,
        send_response: Option<SendResponseFn>,
        start_proactive: bool,
    ) -> EnqueuePassiveResult {
        let key = SessionKey::for_message(&message);
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get_mut(&key) {
            let item = QueuedItem::new(ItemKind::Passive, message, None, send_response);
            entry.items.push_back(Arc::clone(&item));
            entry.wake.notify_waiters();
            return EnqueuePassiveResult {
                queued: true,
                is_proactive_runner: false,
                key,
                item: Some(item),
            };
        }

        if start_proactive {
            let item = QueuedItem::new(ItemKind::Passive, message, None, send_response);
            sessions.insert(key.clone(), SessionEntry::new());
            return EnqueuePassiveResult {
                queued: false,
                is_proactive_runner: true,
                key,
                item: Some(item),
            };
        }

        EnqueuePassiveResult {
            queued: false,
            is_proactive_runner: false,
            key,
            item: None,
        }
    }

    /// Pop all pending items (commands and passives), finish them with a
    /// null result, and return their contents as ephemeral user turns in
    /// enqueue order.
    pub async fn drain_steering_context_messages(&self, key: &SessionKey) -> Vec<ContextTurn> {
        let drained = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(key) {
                Some(entry) => entry.items.drain(..).collect::<Vec<_>>(),
                None => Vec::new(),
            }
        };

        let mut turns = Vec::with_capacity(drained.len());
        for item in &drained {
            turns.push(ContextTurn {
                role: ContextRole::User,
                content: item.message.as_user_turn(),
            });
        }
        for item in drained {
            item.finish().await;
        }
        turns
    }

    /// Scan from the front for the first item eligible to run next (a
    /// command, or a passive carrying a `send_response`), dropping (and
    /// finishing with null) every non-eligible passive ahead of it. Items
    /// behind the chosen one are left queued untouched.
    pub async fn take_next_work_compacted(&self, key: &SessionKey) -> CompactedWork {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get_mut(key) else {
            return CompactedWork {
                dropped: Vec::new(),
                next_item: None,
            };
        };

        let eligible_index = entry
            .items
            .iter()
            .position(|item| item.is_eligible_for_compaction());

        let Some(index) = eligible_index else {
            let dropped = entry.items.drain(..).collect::<Vec<_>>();
            drop(sessions);
            for item in &dropped {
                item.finish().await;
            }
            return CompactedWork {
                dropped,
                next_item: None,
            };
        };

        let mut dropped = Vec::with_capacity(index);
        for _ in 0..index {
            dropped.push(entry.items.pop_front().expect("index within bounds"));
        }
        let next_item = entry.items.pop_front();
        drop(sessions);

        for item in &dropped {
            item.finish().await;
        }

        CompactedWork { dropped, next_item }
    }

    /// Resolve immediately if items are already queued; otherwise wait up
    /// to `timeout` for one to arrive.
    pub async fn wait_for_new_item(&self, key: &SessionKey, timeout: Duration) -> WaitOutcome {
        let wake = {
            let sessions = self.sessions.lock().await;
            match sessions.get(key) {
                Some(entry) if !entry.items.is_empty() => return WaitOutcome::Woken,
                Some(entry) => Arc::clone(&entry.wake),
                None => return WaitOutcome::Timeout,
            }
        };

        match tokio::time::timeout(timeout, wake.notified()).await {
            Ok(()) => WaitOutcome::Woken,
            Err(_) => WaitOutcome::Timeout,
        }
    }

    pub async fn has_queued_commands(&self, key: &SessionKey) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(key)
            .map(|entry| entry.items.iter().any(|item| item.kind == ItemKind::Command))
            .unwrap_or(false)
    }

    pub async fn finish_item(&self, item: &QueuedItem) {
        item.finish().await;
    }

    pub async fn fail_item(&self, item: &QueuedItem, error: BotError) {
        item.fail(error).await;
    }

    /// Finish queued passives, fail queued commands with a retryable
    /// error, and remove the session (spec.md §7 "SteeringAbort").
    pub async fn abort_session(&self, key: &SessionKey, error: BotError) {
        let items = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(key).map(|e| e.items).unwrap_or_default()
        };
        let shared_error = Arc::new(error);
        for item in items {
            match item.kind {
                ItemKind::Command => {
                    let mut state = item.state.lock().await;
                    if state.outcome.is_none() {
                        state.outcome = Some(ItemOutcome::Failed(Arc::clone(&shared_error)));
                        state.notify.notify_waiters();
                    }
                }
                ItemKind::Passive => item.finish().await,
            }
        }
    }

    pub async fn release_session(&self, key: &SessionKey) {
        let items = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(key).map(|e| e.items).unwrap_or_default()
        };
        for item in items {
            match item.kind {
                ItemKind::Command => {
                    item.fail(BotError::SteeringAbort("session released with commands pending".into()))
                        .await
                }
                ItemKind::Passive => item.finish().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArcKey;

    fn msg(nick: &str, content: &str) -> RoomMessage {
        RoomMessage::new(ArcKey::new("libera", "#test"), nick, "bot", content)
    }

    #[tokio::test]
    async fn first_command_for_a_key_becomes_the_runner() {
        let queue = SteeringQueue::new();
        let result = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        assert!(result.is_runner);
    }

    #[tokio::test]
    async fn second_command_for_the_same_key_is_queued_not_a_runner() {
        let queue = SteeringQueue::new();
        let first = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        assert!(first.is_runner);

        let second = queue
            .enqueue_command_or_start_runner(msg("alice", "!s again"), None, None)
            .await;
        assert!(!second.is_runner);
    }

    #[tokio::test]
    async fn drain_steering_context_preserves_enqueue_order() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        queue
            .enqueue_passive(msg("alice", "also recommend sunscreen"), None, false)
            .await;
        queue
            .enqueue_passive(msg("alice", "and a hat"), None, false)
            .await;

        let turns = queue.drain_steering_context_messages(&runner.key).await;
        assert_eq!(turns.len(), 2);
        assert!(turns[0].content.contains("sunscreen"));
        assert!(turns[1].content.contains("hat"));
    }

    #[tokio::test]
    async fn drain_after_full_drain_returns_empty() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        queue.enqueue_passive(msg("alice", "x"), None, false).await;
        let _ = queue.drain_steering_context_messages(&runner.key).await;
        let second = queue.drain_steering_context_messages(&runner.key).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn double_finish_item_is_a_no_op() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        queue.finish_item(&runner.item).await;
        queue.finish_item(&runner.item).await;
        match runner.item.completion().await {
            ItemOutcome::Finished => {}
            ItemOutcome::Failed(_) => panic!("expected finished"),
        }
    }

    #[tokio::test]
    async fn fail_after_finish_is_a_no_op() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        queue.finish_item(&runner.item).await;
        queue
            .fail_item(&runner.item, BotError::SteeringAbort("boom".into()))
            .await;
        match runner.item.completion().await {
            ItemOutcome::Finished => {}
            ItemOutcome::Failed(_) => panic!("finish should have won"),
        }
    }

    #[tokio::test]
    async fn compaction_drops_earlier_passives_without_send_response() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        queue.enqueue_passive(msg("alice", "ignored"), None, false).await;
        let responded: SendResponseFn = Arc::new(|_text| {});
        queue
            .enqueue_passive(msg("alice", "please respond"), Some(responded), false)
            .await;

        let compacted = queue.take_next_work_compacted(&runner.key).await;
        assert_eq!(compacted.dropped.len(), 1);
        assert!(compacted.next_item.unwrap().message.content.contains("please respond"));
    }

    #[tokio::test]
    async fn wait_for_new_item_resolves_immediately_if_already_queued() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        queue.enqueue_passive(msg("alice", "x"), None, false).await;
        match queue.wait_for_new_item(&runner.key, Duration::from_millis(10)).await {
            WaitOutcome::Woken => {}
            WaitOutcome::Timeout => panic!("expected immediate wake"),
        }
    }

    #[tokio::test]
    async fn wait_for_new_item_times_out_when_nothing_arrives() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        match queue.wait_for_new_item(&runner.key, Duration::from_millis(20)).await {
            WaitOutcome::Timeout => {}
            WaitOutcome::Woken => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn has_queued_commands_reflects_command_items_only() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        assert!(!queue.has_queued_commands(&runner.key).await);
        queue.enqueue_passive(msg("alice", "x"), None, false).await;
        assert!(!queue.has_queued_commands(&runner.key).await);
        queue
            .enqueue_command_or_start_runner(msg("alice", "!s another"), None, None)
            .await;
        assert!(queue.has_queued_commands(&runner.key).await);
    }

    #[tokio::test]
    async fn abort_session_fails_commands_and_finishes_passives() {
        let queue = SteeringQueue::new();
        let runner = queue
            .enqueue_command_or_start_runner(msg("alice", "!s hi"), None, None)
            .await;
        let command2 = queue
            .enqueue_command_or_start_runner(msg("alice", "!s again"), None, None)
            .await;
        let passive = queue.enqueue_passive(msg("alice", "x"), None, false).await;

        queue
            .abort_session(&runner.key, BotError::SteeringAbort("executor failed".into()))
            .await;

        match command2.item.completion().await {
            ItemOutcome::Failed(_) => {}
            ItemOutcome::Finished => panic!("queued command should fail on abort"),
        }
        match passive.item.unwrap().completion().await {
            ItemOutcome::Finished => {}
            ItemOutcome::Failed(_) => panic!("queued passive should finish on abort"),
        }
    }
}
