//! Command Executor (spec.md §4.8): the collaborator the Session
//! Coordinator and Proactive Runner call through. Only its contract is
//! core to this spec — but a concrete, working implementation lives here
//! so the crate runs end to end, wiring the Resolver, the Mode Classifier,
//! and the Session Runner together.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent_runtime::{Agent, AgentRuntime, SessionConfig, ToolRegistry};
use crate::classifier::ModeClassifier;
use crate::config::{CommandConfig, ModeConfig};
use crate::error::BotError;
use crate::history::HistoryStore;
use crate::resolver::{CommandResolver, HELP_MODE_KEY};
use crate::session_runner::{self, RunOptions};
use crate::steering::SendResponseFn;
use crate::types::{ResolvedCommand, RoomMessage};

pub type OnAgentReady = Box<dyn FnOnce(Arc<dyn Agent>) + Send>;

pub struct CommandExecutionResult {
    pub response: Option<String>,
    pub resolved: ResolvedCommand,
}

/// Contract the Coordinator and Proactive Runner drive agent runs through
/// (spec.md §4.8).
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        message: RoomMessage,
        trigger_message_id: Option<String>,
        send_response: Option<SendResponseFn>,
        on_agent_ready: Option<OnAgentReady>,
    ) -> Result<CommandExecutionResult, BotError>;

    /// Runs `mode_key`'s runtime directly (no resolver/bypass checks),
    /// with `extra_prompt` appended to the mode's system prompt — the
    /// "proactive prompt suffix" spec.md §4.8 describes.
    async fn execute_proactive(
        &self,
        message: RoomMessage,
        mode_key: &str,
        extra_prompt: &str,
        on_agent_ready: Option<OnAgentReady>,
    ) -> Result<CommandExecutionResult, BotError>;
}

pub struct DefaultExecutor {
    pub config: Arc<CommandConfig>,
    pub classifier: Arc<dyn ModeClassifier>,
    pub history: Arc<dyn HistoryStore>,
    pub agent_runtime: Arc<dyn AgentRuntime>,
    pub tools: Arc<ToolRegistry>,
    pub refusal_fallback_model: Option<String>,
}

impl DefaultExecutor {
    async fn run_mode(
        &self,
        mode: &ModeConfig,
        model: &str,
        query_text: &str,
        extra_prompt: Option<&str>,
        on_agent_ready: Option<OnAgentReady>,
    ) -> Result<String, BotError> {
        let system_prompt = match extra_prompt {
            Some(extra) => format!("{}\n\n{extra}", mode.prompt),
            None => mode.prompt.clone(),
        };
        let session_config = SessionConfig {
            system_prompt,
            model: model.to_string(),
            tools: self.tools.resolve(&mode.tools),
            transform_context: None,
        };
        let run_options = RunOptions {
            refusal_fallback_model: self.refusal_fallback_model.clone(),
            meta_reminder: None,
            on_agent_ready,
        };

        let outcome = session_runner::run_single_turn(
            self.agent_runtime.as_ref(),
            session_config,
            query_text,
            run_options,
        )
        .await?;

        Ok(match &outcome.refusal_fallback_model {
            Some(fallback) => {
                let model_id = fallback.rsplit(':').next().unwrap_or(fallback);
                format!("{}\n\n[refusal fallback to {model_id}]", outcome.text)
            }
            None => outcome.text,
        })
    }
}

#[async_trait]
impl CommandExecutor for DefaultExecutor {
    async fn execute(
        &self,
        message: RoomMessage,
        _trigger_message_id: Option<String>,
        send_response: Option<SendResponseFn>,
        on_agent_ready: Option<OnAgentReady>,
    ) -> Result<CommandExecutionResult, BotError> {
        let context = self
            .history
            .get_context_for_message(&message, self.config.history_size)
            .await?;

        let resolver = CommandResolver::new(&self.config);
        let resolved = resolver.resolve(&message, &context, self.classifier.as_ref()).await;

        if resolved.mode_key == HELP_MODE_KEY {
            let text = match &resolved.parse_error {
                Some(error) => error.clone(),
                None => help_text(&self.config),
            };
            if let Some(send) = &send_response {
                send(text.clone());
            }
            return Ok(CommandExecutionResult { response: Some(text), resolved });
        }

        let Some(mode) = self.config.modes.get(&resolved.mode_key) else {
            return Err(BotError::Configuration(format!("resolved unknown mode '{}'", resolved.mode_key)));
        };

        let model = resolved.model_override.clone().unwrap_or_else(|| resolved.runtime.model.clone());
        let response = self
            .run_mode(mode, &model, &resolved.query_text, None, on_agent_ready)
            .await?;

        if let Some(send) = &send_response {
            send(response.clone());
        }

        Ok(CommandExecutionResult { response: Some(response), resolved })
    }

    async fn execute_proactive(
        &self,
        message: RoomMessage,
        mode_key: &str,
        extra_prompt: &str,
        on_agent_ready: Option<OnAgentReady>,
    ) -> Result<CommandExecutionResult, BotError> {
        let Some(mode) = self.config.modes.get(mode_key) else {
            return Err(BotError::Configuration(format!("proactive mode '{mode_key}' does not exist")));
        };

        let response = self
            .run_mode(mode, &mode.model, &message.content, Some(extra_prompt), on_agent_ready)
            .await?;

        Ok(CommandExecutionResult {
            response: Some(response),
            resolved: ResolvedCommand {
                mode_key: mode_key.to_string(),
                selected_trigger: None,
                selected_automatically: true,
                runtime: crate::types::ModeRuntime {
                    model: mode.model.clone(),
                    reasoning_effort: mode.reasoning_effort.clone(),
                    steering: mode.steering,
                    auto_reduce_context: mode.auto_reduce_context,
                    tool_set: mode.tools.clone(),
                },
                query_text: message.content,
                no_context: false,
                model_override: None,
                parse_error: None,
            },
        })
    }
}

fn help_text(config: &CommandConfig) -> String {
    let mut triggers: Vec<&str> = config.modes.values().flat_map(|m| m.triggers.iter().map(String::as_str)).collect();
    triggers.sort_unstable();
    format!("Available commands: {}", triggers.join(", "))
}
