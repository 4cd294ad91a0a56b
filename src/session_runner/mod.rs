//! Session Runner (spec.md §4.9): drives a single invocation against the
//! agent/tool loop — refusal detection with model fallback, empty-completion
//! retry, usage aggregation, and the ephemeral meta-nudge.
//!
//! Grounded in the teacher SDK's `agent_loop::runner` turn-accounting idiom
//! (subscribe to the event stream, count `turn_end`s) combined with its
//! `util::retry` "classify, recover locally, bounded attempts" shape —
//! here applied to model-level recovery (refusal fallback) rather than
//! transport-level recovery.

use std::sync::Arc;

use regex::Regex;

use crate::agent_runtime::{Agent, AgentRuntime, AgentSession, ContextTransform, ModelMessage, Role, SessionConfig};
use crate::error::BotError;
use crate::types::Usage;

const EMPTY_COMPLETION_MAX_RETRIES: usize = 3;
const EMPTY_COMPLETION_NUDGE: &str =
    "<meta>No valid text or tool use found in response. Please try again.</meta>";
const REFUSAL_WINDOW_CHARS: usize = 160;

/// Per-run knobs the executor supplies (spec.md §4.9).
#[derive(Default)]
pub struct RunOptions {
    pub refusal_fallback_model: Option<String>,
    /// Ephemeral per-run reminder: injected as a `<meta>` user turn at each
    /// turn boundary, never persisted (spec.md §9 "ephemeral nudge").
    pub meta_reminder: Option<String>,
    /// Invoked exactly once, as soon as the `Agent` handle exists and
    /// before the first LLM call, so callers (the Coordinator) can wire
    /// live steering (spec.md §4.8).
    pub on_agent_ready: Option<Box<dyn FnOnce(Arc<dyn Agent>) + Send>>,
}

/// Why the run ended. Mirrors the source system's `stopReason` field;
/// this crate's tool loop only ever completes normally or errors, so this
/// stays a thin marker rather than a rich state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
}

pub struct RunOutcome {
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub iterations: usize,
    pub tool_calls_count: usize,
    /// Reserved for vision-capable model fallback; spec.md §4.9 carries
    /// this field in the return shape but nothing in this spec configures
    /// a vision fallback model, so it is always `false` here.
    pub vision_fallback_activated: bool,
    pub session: Arc<dyn AgentSession>,
    /// Set when a refusal fallback occurred; the executor annotates the
    /// delivered response with `[refusal fallback to <model>]` using this.
    pub refusal_fallback_model: Option<String>,
}

fn refusal_regexes() -> &'static [Regex] {
    use std::sync::OnceLock;
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r#"(?i)"is_refusal"\s*:\s*true"#).expect("valid regex"),
            Regex::new(r"(?i)the ai refused to respond to this request").expect("valid regex"),
            Regex::new(r"(?i)content safety refusal").expect("valid regex"),
        ]
    })
}

/// Matches the `invalid_prompt … safety reasons` signal: both substrings
/// present, within [`REFUSAL_WINDOW_CHARS`] of each other (spec.md §4.9).
fn matches_invalid_prompt_safety(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    let Some(invalid_at) = lower.find("invalid_prompt") else {
        return false;
    };
    lower["invalid_prompt".len() + invalid_at..]
        .find("safety reasons")
        .is_some_and(|offset| offset <= REFUSAL_WINDOW_CHARS)
}

fn looks_like_refusal(text: &str) -> bool {
    refusal_regexes().iter().any(|re| re.is_match(text)) || matches_invalid_prompt_safety(text)
}

/// Build the `transform_context` hook the agent runtime invokes at every
/// turn boundary: run any caller-supplied transform first, then (if a
/// meta-reminder is configured) append it as an ephemeral user turn that
/// never touches the underlying persisted message list.
fn build_transform(inner: Option<ContextTransform>, meta_reminder: Option<String>) -> Option<ContextTransform> {
    match (inner, meta_reminder) {
        (None, None) => None,
        (inner, Some(reminder)) => Some(Arc::new(move |messages: &[ModelMessage]| {
            let mut out = match &inner {
                Some(transform) => transform(messages),
                None => messages.to_vec(),
            };
            out.push(ModelMessage::user(format!("<meta>{reminder}</meta>")));
            out
        })),
        (inner, None) => inner,
    }
}

/// Drive one user-visible turn end to end: create the agent/session from
/// `config` via `runtime`, prompt it, and apply refusal-fallback and
/// empty-completion recovery before returning.
pub async fn run_single_turn(
    runtime: &dyn AgentRuntime,
    mut config: SessionConfig,
    prompt: &str,
    mut options: RunOptions,
) -> Result<RunOutcome, BotError> {
    config.transform_context = build_transform(config.transform_context.take(), options.meta_reminder.take());

    let (agent, session) = runtime.create(config);

    if let Some(on_ready) = options.on_agent_ready.take() {
        on_ready(Arc::clone(&agent));
    }

    // Turn/tool-call accounting (spec.md §4.9) comes straight from each
    // `PromptOutcome`, itself derived by the agent runtime from its own
    // `turn_end`/tool-execution event stream (see `agent_runtime::LoopSession`).
    let mut total_usage = Usage::default();
    let mut iterations = 0usize;
    let mut tool_calls_count = 0usize;

    let mut outcome = match session.prompt(prompt).await {
        Ok(outcome) => outcome,
        Err(error) => {
            if looks_like_refusal(&error.to_string()) {
                if let Some(fallback_model) = options.refusal_fallback_model.clone() {
                    agent.set_model(&fallback_model);
                    session.prompt(prompt).await?
                } else {
                    return Err(error);
                }
            } else {
                return Err(error);
            }
        }
    };
    total_usage.add(&outcome.usage);
    iterations += outcome.iterations;
    tool_calls_count += outcome.tool_calls_count;

    let mut refusal_fallback_model = None;
    if looks_like_refusal(&outcome.text) {
        if let Some(fallback_model) = &options.refusal_fallback_model {
            agent.set_model(fallback_model);
            outcome = session.prompt(prompt).await?;
            total_usage.add(&outcome.usage);
            iterations += outcome.iterations;
            tool_calls_count += outcome.tool_calls_count;
            refusal_fallback_model = Some(fallback_model.clone());
        }
    }

    let mut retries = 0usize;
    while outcome.text.trim().is_empty() && retries < EMPTY_COMPLETION_MAX_RETRIES {
        retries += 1;
        // Ephemeral: must not show up as a persisted user message in
        // `session.messages()` afterward (spec.md §8).
        outcome = session.prompt_ephemeral(EMPTY_COMPLETION_NUDGE).await?;
        total_usage.add(&outcome.usage);
        iterations += outcome.iterations;
        tool_calls_count += outcome.tool_calls_count;
    }

    if outcome.text.trim().is_empty() {
        return Err(BotError::EmptyCompletion);
    }

    Ok(RunOutcome {
        text: outcome.text,
        stop_reason: StopReason::EndTurn,
        usage: total_usage,
        iterations,
        tool_calls_count,
        vision_fallback_activated: false,
        session,
        refusal_fallback_model,
    })
}

/// Sum usage across a set of assistant messages — used by callers that
/// want to verify usage aggregation directly against session history
/// (spec.md §8 "sumAssistantUsage" invariant).
pub fn sum_assistant_usage(messages: &[ModelMessage]) -> Usage {
    Usage::sum(
        messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .filter_map(|m| m.usage.as_ref()),
    )
}
