//! Agent-loop event stream (spec.md §6 "Agent runtime" contract).
//!
//! Grounded in the teacher SDK's `agent_loop::events::AgentEvent` — turn
//! boundaries and tool-execution events are what the Session Runner
//! subscribes to for turn/tool accounting (spec.md §4.9).

use serde::{Deserialize, Serialize};

use super::ModelMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentStart,
    AgentEnd,
    TurnStart { turn_index: usize },
    TurnEnd { turn_index: usize, tool_result_count: usize },
    MessageStart { message: ModelMessage },
    MessageEnd { message: ModelMessage },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        is_error: bool,
    },
}
