//! LLM adapter contract (spec.md §6.1) plus a real HTTP-backed
//! implementation (grounded in the teacher SDK's `provider::openai`) and a
//! scriptable test double used throughout the bot core's test suite.

pub mod http;

#[cfg(test)]
pub mod test_support;

use async_trait::async_trait;

use crate::agent_runtime::tool::ToolDefinition;
use crate::agent_runtime::{ModelMessage, ToolCall};
use crate::error::BotError;
use crate::types::Usage;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ModelMessage>,
    pub model: String,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct AssistantMessage {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// A single chat-completion call against whatever model backs a session.
/// Grounded in the teacher SDK's `ModelProvider::generate_text`, collapsed
/// to the one-shot non-streaming call the Session Runner needs — the bot
/// core never needs incremental token streaming (spec.md §6.1 Non-goals).
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Validate that `model` (e.g. `"openai:gpt-4o-mini"`) names a model
    /// this adapter can serve, without making a network call.
    fn resolve(&self, model: &str) -> Result<(), BotError>;

    async fn complete_simple(&self, request: CompletionRequest) -> Result<AssistantMessage, BotError>;
}
