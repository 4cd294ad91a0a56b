//! Proactive Runner (spec.md §4.10): decides, per interjecting channel,
//! whether an unprompted burst of chat warrants the bot joining in.
//!
//! Grounded in the Session Coordinator's own per-key state ownership
//! (spec.md §3 "Ownership"): the Proactive Runner owns its debounce/active-
//! agent maps exclusively, and only reads the Coordinator's active-session
//! presence through the shared [`ActiveSessionMap`] handle — never the
//! Coordinator's internals directly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::agent_runtime::{Agent, ModelMessage};
use crate::classifier::ModeClassifier;
use crate::config::{CommandConfig, ProactiveConfig};
use crate::coordinator::{ActiveSessionMap, ProactiveHandoff};
use crate::executor::{CommandExecutor, OnAgentReady};
use crate::history::HistoryStore;
use crate::llm::{CompletionRequest, LlmAdapter};
use crate::steering::SendResponseFn;
use crate::types::{ContextRole, ContextTurn, RoomMessage};

#[derive(Debug, Clone, PartialEq)]
struct EvaluationOutcome {
    interject: bool,
    reason: String,
    final_score: Option<i32>,
}

struct Inner {
    proactive_configs: HashMap<String, ProactiveConfig>,
    command_configs: HashMap<String, Arc<CommandConfig>>,
    rate_limiter: Arc<crate::util::RateLimiter>,
    history: Arc<dyn HistoryStore>,
    classifier: Arc<dyn ModeClassifier>,
    llm: Arc<dyn LlmAdapter>,
    executor: Arc<dyn CommandExecutor>,
    sessions: ActiveSessionMap,
    active_debounces: Mutex<HashSet<String>>,
    active_agents: StdMutex<HashMap<String, Arc<dyn Agent>>>,
}

#[derive(Clone)]
pub struct ProactiveRunner {
    inner: Arc<Inner>,
}

impl ProactiveRunner {
    pub fn new(
        proactive_configs: HashMap<String, ProactiveConfig>,
        command_configs: HashMap<String, Arc<CommandConfig>>,
        rate_limiter: Arc<crate::util::RateLimiter>,
        history: Arc<dyn HistoryStore>,
        classifier: Arc<dyn ModeClassifier>,
        llm: Arc<dyn LlmAdapter>,
        executor: Arc<dyn CommandExecutor>,
        sessions: ActiveSessionMap,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                proactive_configs,
                command_configs,
                rate_limiter,
                history,
                classifier,
                llm,
                executor,
                sessions,
                active_debounces: Mutex::new(HashSet::new()),
                active_agents: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_channel_active(&self, channel_key: &str) -> bool {
        self.inner.active_agents.lock().expect("active agents poisoned").contains_key(channel_key)
    }
}

#[async_trait]
impl ProactiveHandoff for ProactiveRunner {
    /// spec.md §4.10 `steerOrStart`.
    async fn steer_or_start(&self, message: RoomMessage, send_response: Option<SendResponseFn>) -> bool {
        let channel_key = message.arc.channel_key();

        if !self.inner.proactive_configs.contains_key(&channel_key) {
            return false;
        }

        if let Some(agent) = self.inner.active_agents.lock().expect("active agents poisoned").get(&channel_key) {
            agent.steer(message);
            return true;
        }

        let mut debounces = self.inner.active_debounces.lock().await;
        if debounces.contains(&channel_key) {
            return false;
        }
        debounces.insert(channel_key.clone());
        drop(debounces);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_session(inner, channel_key, message, send_response).await;
        });

        false
    }
}

async fn run_session(inner: Arc<Inner>, channel_key: String, message: RoomMessage, send_response: Option<SendResponseFn>) {
    let config = match inner.proactive_configs.get(&channel_key) {
        Some(c) => c.clone(),
        None => {
            inner.active_debounces.lock().await.remove(&channel_key);
            return;
        }
    };

    if !debounce_until_silence(&inner, &config, &message).await {
        inner.active_debounces.lock().await.remove(&channel_key);
        return;
    }

    let outcome = evaluate_and_interject(&inner, &config, &channel_key, &message, &send_response).await;
    if let Err(reason) = outcome {
        info!(channel = %channel_key, %reason, "proactive runner: declined to interject");
    }

    inner.active_debounces.lock().await.remove(&channel_key);
    inner.active_agents.lock().expect("active agents poisoned").remove(&channel_key);
}

/// Debounce-until-silence loop (spec.md §4.10 `runSession` step 2). Returns
/// `false` if the loop was aborted because a command session started for
/// this channel while waiting.
async fn debounce_until_silence(inner: &Arc<Inner>, config: &ProactiveConfig, message: &RoomMessage) -> bool {
    let mut since = now_epoch_ms();
    loop {
        tokio::time::sleep(Duration::from_secs(config.debounce_seconds)).await;

        if inner.sessions.has_active_command_session(&message.arc) {
            return false;
        }

        let count = inner
            .history
            .count_messages_since(&message.arc.server_tag, &message.arc.channel_name, since)
            .await
            .unwrap_or(0);
        if count == 0 {
            return true;
        }
        since = now_epoch_ms();
    }
}

async fn evaluate_and_interject(
    inner: &Arc<Inner>,
    config: &ProactiveConfig,
    channel_key: &str,
    message: &RoomMessage,
    send_response: &Option<SendResponseFn>,
) -> Result<(), String> {
    let context = inner
        .history
        .get_context_for_message(message, config.history_size)
        .await
        .map_err(|e| e.to_string())?;

    let evaluation = evaluate_proactive_interjection(inner, config, message, &context).await;
    if !evaluation.interject {
        return Err(evaluation.reason);
    }

    let cmd_config = inner
        .command_configs
        .get(channel_key)
        .ok_or_else(|| "no command config for channel".to_string())?;

    let serious_triggers = cmd_config.triggers_for_mode(&config.serious_model_mode_key);
    let allowed_labels: HashSet<String> = cmd_config
        .mode_classifier
        .labels
        .iter()
        .filter(|(_, trigger)| serious_triggers.contains(trigger.as_str()))
        .map(|(label, _)| label.clone())
        .collect();

    let label = inner.classifier.classify(&context, &cmd_config.mode_classifier, &allowed_labels).await;
    let resolved_trigger = cmd_config.mode_classifier.labels.get(&label);
    let resolved_mode_key = resolved_trigger
        .and_then(|trigger| cmd_config.mode_owning_trigger(trigger))
        .map(|(mode_key, _)| mode_key);

    if resolved_mode_key != Some(config.serious_model_mode_key.as_str()) {
        return Err(format!("classifier resolved '{label}', not the serious mode"));
    }

    let inner_for_ready = Arc::clone(inner);
    let channel_key_for_ready = channel_key.to_string();
    let on_ready: OnAgentReady = Box::new(move |agent| {
        inner_for_ready
            .active_agents
            .lock()
            .expect("active agents poisoned")
            .insert(channel_key_for_ready.clone(), agent);
    });

    let result = inner
        .executor
        .execute_proactive(message.clone(), &config.serious_model_mode_key, &config.serious_extra_prompt, Some(on_ready))
        .await
        .map_err(|e| e.to_string())?;

    if let (Some(response), Some(send)) = (&result.response, send_response) {
        send(response.clone());
    }

    Ok(())
}

/// spec.md §4.10 `evaluateProactiveInterjection`.
async fn evaluate_proactive_interjection(
    inner: &Arc<Inner>,
    config: &ProactiveConfig,
    message: &RoomMessage,
    context: &[ContextTurn],
) -> EvaluationOutcome {
    if !inner.rate_limiter.check_limit().await {
        return EvaluationOutcome { interject: false, reason: "rate limited".into(), final_score: None };
    }

    let mut final_score: Option<i32> = None;
    for model in &config.validation_models {
        let system_prompt = config.interject_prompt.replace("{message}", &message.content);
        let messages: Vec<ModelMessage> = context
            .iter()
            .map(|turn| match turn.role {
                ContextRole::User => ModelMessage::user(turn.content.clone()),
                ContextRole::Assistant => ModelMessage::user(format!("[assistant] {}", turn.content)),
            })
            .collect();

        let request = CompletionRequest { system_prompt: Some(system_prompt), messages, model: model.clone(), tools: Vec::new() };

        match inner.llm.complete_simple(request).await {
            Ok(assistant) => match parse_score(&assistant.text) {
                Some(score) => {
                    if score < config.interject_threshold - 1 {
                        return EvaluationOutcome {
                            interject: false,
                            reason: format!("score {score} is below threshold - 1"),
                            final_score: Some(score),
                        };
                    }
                    final_score = Some(score);
                }
                None => {
                    warn!(%model, "proactive validation: could not parse a score from the response");
                    return EvaluationOutcome { interject: false, reason: "unparseable validation score".into(), final_score: None };
                }
            },
            Err(error) => {
                warn!(%model, %error, "proactive validation: LLM call failed");
                return EvaluationOutcome { interject: false, reason: format!("llm error: {error}"), final_score: None };
            }
        }
    }

    match final_score {
        Some(score) if score >= config.interject_threshold => {
            EvaluationOutcome { interject: true, reason: "approved".into(), final_score: Some(score) }
        }
        Some(score) => EvaluationOutcome { interject: false, reason: format!("final score {score} below threshold"), final_score: Some(score) },
        None => EvaluationOutcome { interject: false, reason: "no validation models configured".into(), final_score: None },
    }
}

fn parse_score(text: &str) -> Option<i32> {
    let re = Regex::new(r"(\d+)\s*/\s*10").ok()?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
