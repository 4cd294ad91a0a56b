//! Mode Classifier (spec.md §4.5): an LLM call that labels conversation
//! context into one of the configured mode-classifier labels, with robust
//! parsing and a fallback that never surfaces as an error to its caller.
//!
//! Grounded in the teacher SDK's single-shot `LlmAdapter::complete_simple`
//! call pattern (provider/openai.rs `generate_text`), simplified to the
//! one label-token response this classifier expects.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::agent_runtime::ModelMessage;
use crate::config::ModeClassifierConfig;
use crate::llm::{CompletionRequest, LlmAdapter};
use crate::types::{ContextRole, ContextTurn};

/// Labels the conversation context into one of `allowed_labels`, never
/// surfacing an error: LLM failures and unparseable output fall back to
/// `config.fallback_label` locally (spec.md §7 "ClassifierError").
#[async_trait]
pub trait ModeClassifier: Send + Sync {
    async fn classify(
        &self,
        context: &[ContextTurn],
        config: &ModeClassifierConfig,
        allowed_labels: &HashSet<String>,
    ) -> String;
}

pub struct LlmModeClassifier {
    llm: Arc<dyn LlmAdapter>,
}

impl LlmModeClassifier {
    pub fn new(llm: Arc<dyn LlmAdapter>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ModeClassifier for LlmModeClassifier {
    async fn classify(
        &self,
        context: &[ContextTurn],
        config: &ModeClassifierConfig,
        allowed_labels: &HashSet<String>,
    ) -> String {
        let messages = context
            .iter()
            .map(|turn| match turn.role {
                ContextRole::User => ModelMessage::user(turn.content.clone()),
                ContextRole::Assistant => ModelMessage::assistant(turn.content.clone()),
            })
            .collect();

        let request = CompletionRequest {
            system_prompt: Some(config.prompt.clone()),
            messages,
            model: config.model.clone(),
            tools: Vec::new(),
        };

        match self.llm.complete_simple(request).await {
            Ok(assistant) => parse_label(&assistant.text, allowed_labels)
                .unwrap_or_else(|| {
                    warn!(fallback = %config.fallback_label, "mode classifier: no label found in response");
                    config.fallback_label.clone()
                }),
            Err(error) => {
                warn!(%error, fallback = %config.fallback_label, "mode classifier: LLM call failed");
                config.fallback_label.clone()
            }
        }
    }
}

/// Parse exactly one label out of `text`, constrained to `allowed`.
///
/// Order: exact match (the whole trimmed response equals a label) first;
/// otherwise a whole-word boundary match, taking the label with the
/// highest occurrence count. Ties fall back to the lexicographic label
/// order, since the config format does not preserve declaration order
/// (see DESIGN.md).
fn parse_label(text: &str, allowed: &HashSet<String>) -> Option<String> {
    let trimmed = text.trim();
    if allowed.contains(trimmed) {
        return Some(trimmed.to_string());
    }

    let mut sorted_labels: Vec<&String> = allowed.iter().collect();
    sorted_labels.sort();

    let mut best: Option<(usize, &String)> = None;
    for label in sorted_labels {
        let pattern = format!(r"\b{}\b", regex::escape(label));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };
        let count = re.find_iter(text).count();
        if count == 0 {
            continue;
        }
        match best {
            Some((best_count, _)) if best_count >= count => {}
            _ => best = Some((count, label)),
        }
    }

    best.map(|(_, label)| label.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use crate::llm::AssistantMessage;
    use std::collections::HashMap;

    fn labels(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    struct StaticLlm(String);

    #[async_trait]
    impl LlmAdapter for StaticLlm {
        fn resolve(&self, _model: &str) -> Result<(), BotError> {
            Ok(())
        }
        async fn complete_simple(&self, _request: CompletionRequest) -> Result<AssistantMessage, BotError> {
            Ok(AssistantMessage {
                text: self.0.clone(),
                tool_calls: vec![],
                usage: Default::default(),
            })
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmAdapter for FailingLlm {
        fn resolve(&self, _model: &str) -> Result<(), BotError> {
            Ok(())
        }
        async fn complete_simple(&self, _request: CompletionRequest) -> Result<AssistantMessage, BotError> {
            Err(BotError::Network("connection reset".into()))
        }
    }

    fn classifier_config() -> ModeClassifierConfig {
        let mut map = HashMap::new();
        map.insert("SARCASTIC".to_string(), "!d".to_string());
        map.insert("SERIOUS".to_string(), "!s".to_string());
        ModeClassifierConfig {
            model: "openai:gpt-4o-mini".into(),
            labels: map,
            fallback_label: "SARCASTIC".into(),
            prompt: "Classify.".into(),
        }
    }

    #[tokio::test]
    async fn exact_uppercase_match_wins() {
        let classifier = LlmModeClassifier::new(Arc::new(StaticLlm("SERIOUS".into())));
        let label = classifier
            .classify(&[], &classifier_config(), &labels(&["SARCASTIC", "SERIOUS"]))
            .await;
        assert_eq!(label, "SERIOUS");
    }

    #[tokio::test]
    async fn whole_word_match_with_highest_count_wins() {
        let text = "I think this is SERIOUS, quite SERIOUS actually, not SARCASTIC at all.";
        let classifier = LlmModeClassifier::new(Arc::new(StaticLlm(text.into())));
        let label = classifier
            .classify(&[], &classifier_config(), &labels(&["SARCASTIC", "SERIOUS"]))
            .await;
        assert_eq!(label, "SERIOUS");
    }

    #[tokio::test]
    async fn unparseable_response_falls_back_to_configured_label() {
        let classifier = LlmModeClassifier::new(Arc::new(StaticLlm("I'm not sure what to say.".into())));
        let label = classifier
            .classify(&[], &classifier_config(), &labels(&["SARCASTIC", "SERIOUS"]))
            .await;
        assert_eq!(label, "SARCASTIC");
    }

    #[tokio::test]
    async fn llm_error_falls_back_to_configured_label() {
        let classifier = LlmModeClassifier::new(Arc::new(FailingLlm));
        let label = classifier
            .classify(&[], &classifier_config(), &labels(&["SARCASTIC", "SERIOUS"]))
            .await;
        assert_eq!(label, "SARCASTIC");
    }
}
