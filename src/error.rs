//! Unified error type for the bot core.
//!
//! Mirrors the categorize-then-decide shape the agent SDK this crate grew
//! out of uses for its own error type: every fallible core operation
//! returns [`BotError`], and callers branch on [`BotError::category`] rather
//! than matching individual variants when deciding whether to retry.

use thiserror::Error;

/// Broad error category, used to decide retry/recovery behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parse,
    Classifier,
    Refusal,
    EmptyCompletion,
    ProactiveEval,
    SteeringAbort,
    RateLimit,
    Network,
    Configuration,
    Transport,
    Store,
    Unknown,
}

/// Primary error type for all bot-core operations.
#[derive(Error, Debug)]
pub enum BotError {
    #[error("{0}")]
    Parse(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("refusal detected and no fallback model recovered it")]
    Refusal { text: String },

    #[error("Agent produced empty completion.")]
    EmptyCompletion,

    #[error("proactive evaluation error: {0}")]
    ProactiveEval(String),

    #[error("session aborted: {0}")]
    SteeringAbort(String),

    #[error("rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error ({platform}): {message}")]
    Transport { platform: String, message: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl BotError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse(_) => ErrorCategory::Parse,
            Self::Classifier(_) => ErrorCategory::Classifier,
            Self::Refusal { .. } => ErrorCategory::Refusal,
            Self::EmptyCompletion => ErrorCategory::EmptyCompletion,
            Self::ProactiveEval(_) => ErrorCategory::ProactiveEval,
            Self::SteeringAbort(_) => ErrorCategory::SteeringAbort,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Store(_) => ErrorCategory::Store,
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether transports should retry sending on this error (§7: SendTransient).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network
        )
    }

    /// Whether the Steering Queue should fail queued commands with this error
    /// rather than silently drop them (§4.6, §7 SteeringAbort).
    pub fn is_steering_abort(&self) -> bool {
        matches!(self.category(), ErrorCategory::SteeringAbort)
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
