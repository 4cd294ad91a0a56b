//! Typed configuration (spec.md §3 `CommandConfig`/`ProactiveConfig`, §9
//! "Dynamic/unknown config fields").
//!
//! The source system this was distilled from threads config around as
//! `Record<string, unknown>` casts. Here every field is a concrete Rust
//! type loaded from TOML via `serde`; unknown keys and invariant
//! violations fail fast at load time with an operator-facing message,
//! rather than surfacing as a runtime `None`/cast failure deep inside the
//! resolver.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// Default mode selection for a room: either an explicit trigger, or a
/// classifier-driven mode key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DefaultMode {
    Trigger { token: String },
    Classifier { mode_key: String },
}

/// A single named agent configuration (spec.md glossary "Mode").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModeConfig {
    pub model: String,
    pub prompt: String,
    pub triggers: Vec<String>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default = "default_true")]
    pub steering: bool,
    #[serde(default)]
    pub auto_reduce_context: bool,
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// `modeClassifier` config: an LLM call that labels context into a mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModeClassifierConfig {
    pub model: String,
    /// label -> trigger token it maps into.
    pub labels: HashMap<String, String>,
    pub fallback_label: String,
    pub prompt: String,
}

/// Per-room resolved command configuration (spec.md §3 `CommandConfig`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub history_size: usize,
    pub default_mode: DefaultMode,
    /// channelKey -> trigger.
    #[serde(default)]
    pub channel_modes: HashMap<String, String>,
    /// modeKey -> mode.
    pub modes: HashMap<String, ModeConfig>,
    pub mode_classifier: ModeClassifierConfig,
    pub help_token: String,
    #[serde(default)]
    pub flag_tokens: HashSet<String>,
    #[serde(default)]
    pub ignore_users: HashSet<String>,
}

impl CommandConfig {
    /// Validate the cross-field invariants spec.md §3 requires:
    /// - every label maps to a declared trigger
    /// - every trigger belongs to exactly one mode
    /// - `defaultMode` refers to an existing mode or label
    pub fn validate(&self) -> Result<(), BotError> {
        let mut trigger_owner: HashMap<&str, &str> = HashMap::new();
        for (mode_key, mode) in &self.modes {
            for trigger in &mode.triggers {
                if let Some(existing) = trigger_owner.insert(trigger.as_str(), mode_key.as_str()) {
                    return Err(BotError::Configuration(format!(
                        "trigger '{trigger}' is declared by both mode '{existing}' and mode '{mode_key}'"
                    )));
                }
            }
        }

        for (label, trigger) in &self.mode_classifier.labels {
            if !trigger_owner.contains_key(trigger.as_str()) {
                return Err(BotError::Configuration(format!(
                    "modeClassifier label '{label}' maps to undeclared trigger '{trigger}'"
                )));
            }
        }

        if !self.mode_classifier.labels.contains_key(&self.mode_classifier.fallback_label)
            && !self.mode_classifier.labels.is_empty()
        {
            return Err(BotError::Configuration(format!(
                "modeClassifier fallbackLabel '{}' is not among the declared labels",
                self.mode_classifier.fallback_label
            )));
        }

        match &self.default_mode {
            DefaultMode::Trigger { token } => {
                if token != &self.help_token && !trigger_owner.contains_key(token.as_str()) {
                    return Err(BotError::Configuration(format!(
                        "defaultMode trigger '{token}' is not declared by any mode"
                    )));
                }
            }
            DefaultMode::Classifier { mode_key } => {
                if !self.modes.contains_key(mode_key) {
                    return Err(BotError::Configuration(format!(
                        "defaultMode classifier mode '{mode_key}' does not exist"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Triggers that belong to `mode_key`, used to constrain the classifier
    /// (spec.md §4.4 "constrained to labels whose triggers map into
    /// `<modeKey>`").
    pub fn triggers_for_mode(&self, mode_key: &str) -> HashSet<&str> {
        self.modes
            .get(mode_key)
            .map(|m| m.triggers.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn mode_owning_trigger(&self, trigger: &str) -> Option<(&str, &ModeConfig)> {
        self.modes
            .iter()
            .find(|(_, mode)| mode.triggers.iter().any(|t| t == trigger))
            .map(|(key, mode)| (key.as_str(), mode))
    }
}

/// Resolved proactive-interjection configuration (spec.md §3 `ProactiveConfig`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProactiveConfig {
    pub interjecting_channels: HashSet<String>,
    pub debounce_seconds: u64,
    pub history_size: usize,
    pub rate_limit: u32,
    pub rate_period_seconds: u64,
    pub interject_threshold: i32,
    pub validation_models: Vec<String>,
    pub serious_model_mode_key: String,
    pub interject_prompt: String,
    pub serious_extra_prompt: String,
}

/// Top-level typed configuration accessor. Real deployments load this from
/// TOML (`BotConfig::load`); tests construct it in-memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    pub rooms: HashMap<String, CommandConfig>,
    pub proactive: HashMap<String, ProactiveConfig>,
    #[serde(default)]
    pub refusal_fallback_model: Option<String>,
}

impl BotConfig {
    pub fn load_from_str(toml_text: &str) -> Result<Self, BotError> {
        let config: BotConfig = toml::from_str(toml_text)
            .map_err(|e| BotError::Configuration(format!("failed to parse config: {e}")))?;
        for (room, cmd) in &config.rooms {
            cmd.validate()
                .map_err(|e| BotError::Configuration(format!("room '{room}': {e}")))?;
        }
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, BotError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BotError::Configuration(format!("reading {}: {e}", path.display())))?;
        Self::load_from_str(&text)
    }

    pub fn command_config(&self, channel_key: &str) -> Option<&CommandConfig> {
        self.rooms.get(channel_key)
    }

    pub fn proactive_config(&self, channel_key: &str) -> Option<&ProactiveConfig> {
        self.proactive.get(channel_key)
    }

    /// Default config directory, following the teacher SDK's XDG-based
    /// layered-config convention.
    pub fn default_config_path() -> Option<std::path::PathBuf> {
        directories::ProjectDirs::from("", "", "parley")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_command_config() -> CommandConfig {
        let mut modes = HashMap::new();
        modes.insert(
            "serious".to_string(),
            ModeConfig {
                model: "anthropic:claude-3-5-sonnet-20241022".into(),
                prompt: "Be serious.".into(),
                triggers: vec!["!s".into(), "!a".into()],
                reasoning_effort: Some("medium".into()),
                steering: true,
                auto_reduce_context: false,
                tools: vec!["web_search".into()],
            },
        );
        modes.insert(
            "sarcastic".to_string(),
            ModeConfig {
                model: "openai:gpt-4o-mini".into(),
                prompt: "Be sarcastic.".into(),
                triggers: vec!["!d".into()],
                reasoning_effort: None,
                steering: true,
                auto_reduce_context: false,
                tools: vec![],
            },
        );

        let mut labels = HashMap::new();
        labels.insert("SARCASTIC".to_string(), "!d".to_string());
        labels.insert("SERIOUS".to_string(), "!s".to_string());

        CommandConfig {
            history_size: 20,
            default_mode: DefaultMode::Classifier {
                mode_key: "sarcastic".into(),
            },
            channel_modes: HashMap::new(),
            modes,
            mode_classifier: ModeClassifierConfig {
                model: "openai:gpt-4o-mini".into(),
                labels,
                fallback_label: "SARCASTIC".into(),
                prompt: "Classify the conversation.".into(),
            },
            help_token: "!help".into(),
            flag_tokens: ["--no-context".to_string()].into_iter().collect(),
            ignore_users: HashSet::new(),
        }
    }

    #[test]
    fn validates_good_config() {
        assert!(sample_command_config().validate().is_ok());
    }

    #[test]
    fn rejects_trigger_owned_by_two_modes() {
        let mut cfg = sample_command_config();
        cfg.modes.get_mut("sarcastic").unwrap().triggers.push("!s".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_label_mapping_to_undeclared_trigger() {
        let mut cfg = sample_command_config();
        cfg.mode_classifier.labels.insert("GHOST".into(), "!ghost".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_default_mode_referencing_missing_mode() {
        let mut cfg = sample_command_config();
        cfg.default_mode = DefaultMode::Classifier {
            mode_key: "nonexistent".into(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn triggers_for_mode_returns_declared_set() {
        let cfg = sample_command_config();
        let triggers = cfg.triggers_for_mode("serious");
        assert!(triggers.contains("!s"));
        assert!(triggers.contains("!a"));
        assert!(!triggers.contains("!d"));
    }

    #[test]
    fn load_from_str_fails_fast_on_unknown_top_level_key() {
        let toml_text = r#"
            typo_field = true

            [rooms]
            [proactive]
        "#;
        assert!(BotConfig::load_from_str(toml_text).is_err());
    }

    #[test]
    fn load_from_str_fails_fast_on_unknown_mode_key() {
        let toml_text = r#"
            [proactive]

            [rooms."libera#test"]
            history_size = 20
            help_token = "!help"

            [rooms."libera#test".default_mode]
            kind = "trigger"
            token = "!s"

            [rooms."libera#test".mode_classifier]
            model = "openai:gpt-4o-mini"
            fallback_label = "SERIOUS"
            prompt = "classify"
            [rooms."libera#test".mode_classifier.labels]
            SERIOUS = "!s"

            [rooms."libera#test".modes.serious]
            model = "anthropic:claude-3-5-sonnet-20241022"
            prompt = "Be serious."
            triggers = ["!s"]
            made_up_key = "nope"
        "#;
        assert!(BotConfig::load_from_str(toml_text).is_err());
    }
}
