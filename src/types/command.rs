//! Resolver output types (spec.md §3, §4.4).

use serde::{Deserialize, Serialize};

/// Resolved runtime for a mode: what actually gets sent to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeRuntime {
    pub model: String,
    pub reasoning_effort: Option<String>,
    pub steering: bool,
    pub auto_reduce_context: bool,
    pub tool_set: Vec<String>,
}

/// Output of [`crate::resolver::CommandResolver::parse_prefix`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parsed {
    pub no_context: bool,
    pub flags: Vec<String>,
    pub trigger: Option<String>,
    pub is_help: bool,
    pub model_override: Option<String>,
    pub query_text: String,
    pub parse_error: Option<String>,
}

/// Output of [`crate::resolver::CommandResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    pub mode_key: String,
    pub selected_trigger: Option<String>,
    pub selected_automatically: bool,
    pub runtime: ModeRuntime,
    pub query_text: String,
    pub no_context: bool,
    pub model_override: Option<String>,
    pub parse_error: Option<String>,
}

impl ResolvedCommand {
    pub fn has_parse_error(&self) -> bool {
        self.parse_error.is_some()
    }
}
