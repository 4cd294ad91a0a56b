//! OpenAI-compatible chat-completions adapter.
//!
//! Model strings are `"provider:model"` (spec.md §3 glossary "Mode"); this
//! adapter resolves `provider` to a base URL and an API key env var and
//! speaks the OpenAI Chat Completions wire format to all of them, since
//! every provider this bot core is configured against exposes an
//! OpenAI-compatible endpoint. Grounded in the teacher SDK's
//! `provider::openai::OpenAiProvider` and `provider::http`.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use crate::agent_runtime::{ModelMessage, Role, ToolCall};
use crate::error::BotError;
use crate::types::Usage;

use super::{AssistantMessage, CompletionRequest, LlmAdapter};

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build()
            .expect("failed to build HTTP client")
    })
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// Resolves `"provider:model"` strings against a configured provider table
/// and executes chat completions over HTTP.
pub struct HttpLlmAdapter {
    providers: HashMap<String, ProviderEndpoint>,
}

impl HttpLlmAdapter {
    pub fn new(providers: HashMap<String, ProviderEndpoint>) -> Self {
        Self { providers }
    }

    fn split_model(model: &str) -> Result<(&str, &str), BotError> {
        model
            .split_once(':')
            .ok_or_else(|| BotError::Configuration(format!("model '{model}' is missing a provider prefix")))
    }

    fn endpoint_for(&self, provider: &str) -> Result<&ProviderEndpoint, BotError> {
        self.providers
            .get(provider)
            .ok_or_else(|| BotError::Configuration(format!("no endpoint configured for provider '{provider}'")))
    }
}

#[async_trait]
impl LlmAdapter for HttpLlmAdapter {
    fn resolve(&self, model: &str) -> Result<(), BotError> {
        let (provider, _) = Self::split_model(model)?;
        self.endpoint_for(provider)?;
        Ok(())
    }

    async fn complete_simple(&self, request: CompletionRequest) -> Result<AssistantMessage, BotError> {
        let (provider, model_id) = Self::split_model(&request.model)?;
        let endpoint = self.endpoint_for(provider)?;

        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system_prompt }));
        }
        messages.extend(request.messages.iter().map(message_to_wire));

        let mut body = serde_json::json!({
            "model": model_id,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tool_defs: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tool_defs);
        }

        debug!(model = model_id, provider, "chat completion request");

        let resp = shared_client()
            .post(format!("{}/chat/completions", endpoint.base_url))
            .headers(bearer_headers(&endpoint.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| BotError::Network(format!("decoding chat response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(BotError::EmptyCompletion)?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments)),
            })
            .collect();

        Ok(AssistantMessage {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: parsed
                .usage
                .map(|u| Usage {
                    input: u.prompt_tokens as u64,
                    output: u.completion_tokens as u64,
                    total_tokens: u.total_tokens as u64,
                    ..Default::default()
                })
                .unwrap_or_default(),
        })
    }
}

fn message_to_wire(msg: &ModelMessage) -> serde_json::Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.text,
        }),
        _ if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments.to_string() },
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": if msg.text.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(msg.text.clone()) },
                "tool_calls": tool_calls,
            })
        }
        Role::System => serde_json::json!({ "role": "system", "content": msg.text }),
        Role::User => serde_json::json!({ "role": "user", "content": msg.text }),
        Role::Assistant => serde_json::json!({ "role": "assistant", "content": msg.text }),
    }
}

fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

fn status_to_error(status: u16, body: &str) -> BotError {
    match status {
        401 | 403 => BotError::Configuration(format!("authentication failed: {body}")),
        429 => BotError::RateLimited {
            retry_after_ms: extract_retry_after_ms(body),
        },
        _ => BotError::Network(format!("HTTP {status}: {body}")),
    }
}

fn extract_retry_after_ms(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.get("retry_after")).and_then(|r| r.as_f64()))
        .map(|secs| (secs * 1000.0) as u64)
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
