//! Session Coordinator (spec.md §4.7): dispatches every inbound message to
//! exactly one of { start-new-run, steer-running-agent, proactive,
//! auto-chronicle-only } and owns the per-key active-session map.
//!
//! The Proactive Runner (§4.10) needs to ask "is a command session active
//! for this arc?" without the Coordinator and the Proactive Runner holding
//! constructor references to each other. Grounded in spec.md §9's
//! "avoid constructor cycles" design note: both sides share one
//! [`ActiveSessionMap`] handle instead of each other.
//!
//! **Deliberate divergence from `crate::steering::SteeringQueue`:** §4.7's
//! command path is implemented here with its own `Mutex<ActiveSession>`
//! buffer-then-steer mechanism, following §4.7.1/§4.7.2's literal text,
//! rather than by calling into the `SteeringQueue` FIFO/compaction
//! primitive §4.6 describes. This coordinator therefore does not exercise
//! §4.6's `takeNextWorkCompacted`/`drainSteeringContextMessages` drain path
//! from §4.12's `running → draining → idle` lifecycle; `SteeringQueue`
//! remains a complete, independently tested primitive with no caller in
//! this crate. See DESIGN.md "Resolved Open Questions #1" for the full
//! reasoning — this is not an oversight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::agent_runtime::Agent;
use crate::config::CommandConfig;
use crate::executor::{CommandExecutionResult, CommandExecutor, OnAgentReady};
use crate::history::HistoryStore;
use crate::resolver::CommandResolver;
use crate::steering::SendResponseFn;
use crate::types::{ArcKey, RoomMessage, SessionKey};

/// Called by the Coordinator on the passive path (spec.md §4.7.2 "Then
/// trigger the auto-chronicler"). Out of scope beyond this call site
/// (spec.md §1); a no-op default keeps the crate runnable without one.
#[async_trait]
pub trait AutoChronicler: Send + Sync {
    async fn on_passive_message(&self, message: &RoomMessage);
}

pub struct NoopAutoChronicler;

#[async_trait]
impl AutoChronicler for NoopAutoChronicler {
    async fn on_passive_message(&self, _message: &RoomMessage) {}
}

/// What actually happened to an inbound message — returned for
/// testability (spec.md §8's "these four are mutually exclusive"
/// invariant is asserted directly against this).
#[derive(Debug)]
pub enum DispatchOutcome {
    StartedRun(Result<CommandExecutionResult, crate::error::BotError>),
    Steered,
    Proactive { started_or_steered: bool },
    Dropped,
}

struct ActiveSession {
    agent: Option<Arc<dyn Agent>>,
    buffer: Vec<RoomMessage>,
}

/// Shared handle to the Coordinator's active-session presence, usable by
/// the Proactive Runner's `hasActiveCommandSession()` check without either
/// side depending on the other's type.
#[derive(Default, Clone)]
pub struct ActiveSessionMap {
    sessions: Arc<Mutex<HashMap<SessionKey, Arc<Mutex<ActiveSession>>>>>,
}

impl ActiveSessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_active_command_session(&self, arc: &ArcKey) -> bool {
        self.sessions.lock().expect("active session map poisoned").keys().any(|k| &k.arc == arc)
    }
}

pub struct SessionCoordinator {
    config: Arc<CommandConfig>,
    history: Arc<dyn HistoryStore>,
    executor: Arc<dyn CommandExecutor>,
    proactive: Arc<dyn ProactiveHandoff>,
    chronicler: Arc<dyn AutoChronicler>,
    sessions: ActiveSessionMap,
}

/// The slice of the Proactive Runner's surface the Coordinator needs
/// (spec.md §4.10 `steerOrStart`).
#[async_trait]
pub trait ProactiveHandoff: Send + Sync {
    async fn steer_or_start(&self, message: RoomMessage, send_response: Option<SendResponseFn>) -> bool;
}

impl SessionCoordinator {
    pub fn new(
        config: Arc<CommandConfig>,
        history: Arc<dyn HistoryStore>,
        executor: Arc<dyn CommandExecutor>,
        proactive: Arc<dyn ProactiveHandoff>,
        chronicler: Arc<dyn AutoChronicler>,
        sessions: ActiveSessionMap,
    ) -> Self {
        Self { config, history, executor, proactive, chronicler, sessions }
    }

    pub fn session_map(&self) -> ActiveSessionMap {
        self.sessions.clone()
    }

    /// spec.md §4.7 `handleIncomingMessage`.
    pub async fn handle_incoming_message(
        &self,
        message: RoomMessage,
        is_direct: bool,
        send_response: Option<SendResponseFn>,
    ) -> DispatchOutcome {
        let trigger_message_id = self
            .history
            .add_message(&message)
            .await
            .ok()
            .map(|id| id.to_string());

        if !is_direct {
            return self.passive_path(message, send_response).await;
        }

        let resolver = CommandResolver::new(&self.config);
        let parsed = resolver.parse_prefix(&message.content, &message.mynick);

        if resolver.should_bypass_steering(&parsed) {
            let result = self
                .executor
                .execute(message, trigger_message_id, send_response, None)
                .await;
            return DispatchOutcome::StartedRun(result);
        }

        self.command_path(message, trigger_message_id, send_response).await
    }

    /// CLI/test entry point: bypasses the active-session map entirely
    /// (spec.md §4.7 `execute(message)`).
    pub async fn execute(&self, message: RoomMessage) -> Result<CommandExecutionResult, crate::error::BotError> {
        self.executor.execute(message, None, None, None).await
    }

    async fn command_path(
        &self,
        message: RoomMessage,
        trigger_message_id: Option<String>,
        send_response: Option<SendResponseFn>,
    ) -> DispatchOutcome {
        let key = SessionKey::for_message(&message);

        let existing = {
            let sessions = self.sessions.sessions.lock().expect("active session map poisoned");
            sessions.get(&key).cloned()
        };

        if let Some(session) = existing {
            steer_or_buffer(&session, message);
            return DispatchOutcome::Steered;
        }

        let session_state = Arc::new(Mutex::new(ActiveSession { agent: None, buffer: Vec::new() }));
        {
            let mut sessions = self.sessions.sessions.lock().expect("active session map poisoned");
            sessions.insert(key.clone(), Arc::clone(&session_state));
        }

        let on_ready: OnAgentReady = {
            let session_state = Arc::clone(&session_state);
            Box::new(move |agent: Arc<dyn Agent>| {
                let mut guard = session_state.lock().expect("active session poisoned");
                for buffered in guard.buffer.drain(..) {
                    agent.steer(buffered);
                }
                guard.agent = Some(agent);
            })
        };

        let result = self
            .executor
            .execute(message, trigger_message_id, send_response, Some(on_ready))
            .await;

        self.sessions.sessions.lock().expect("active session map poisoned").remove(&key);

        DispatchOutcome::StartedRun(result)
    }

    async fn passive_path(&self, message: RoomMessage, send_response: Option<SendResponseFn>) -> DispatchOutcome {
        let key = SessionKey::for_message(&message);

        let existing = {
            let sessions = self.sessions.sessions.lock().expect("active session map poisoned");
            sessions.get(&key).cloned()
        };

        self.chronicler.on_passive_message(&message).await;

        if let Some(session) = existing {
            steer_or_buffer(&session, message);
            return DispatchOutcome::Steered;
        }

        let started = self.proactive.steer_or_start(message, send_response).await;
        DispatchOutcome::Proactive { started_or_steered: started }
    }
}

fn steer_or_buffer(session: &Arc<Mutex<ActiveSession>>, message: RoomMessage) {
    let mut guard = session.lock().expect("active session poisoned");
    match &guard.agent {
        Some(agent) => {
            agent.steer(message);
        }
        None => guard.buffer.push(message),
    }
}
