//! Tool contract for agent-runtime tool calls (spec.md §6.2).
//!
//! Grounded in the teacher SDK's `tools::tool::Tool` trait, trimmed to the
//! single `execute` entry point the loop runner actually needs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BotError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, BotError>;
}

/// Name → tool lookup used by the Command Executor to turn a mode's
/// configured `tool_set` (a list of names, per `CommandConfig`) into the
/// concrete `Tool` trait objects an `AgentRuntime` expects.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    /// Resolve `names` into tools, skipping (and logging) any name with no
    /// registered tool rather than failing the whole run.
    pub fn resolve(&self, names: &[String]) -> Vec<Arc<dyn Tool>> {
        names
            .iter()
            .filter_map(|name| match self.tools.get(name) {
                Some(tool) => Some(Arc::clone(tool)),
                None => {
                    tracing::warn!(tool = %name, "mode references unknown tool, skipping");
                    None
                }
            })
            .collect()
    }
}
