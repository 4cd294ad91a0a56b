//! Command Resolver (spec.md §4.4): parses message text into a trigger,
//! flags, model override, and query text, then resolves that into a
//! concrete mode + runtime.

use std::collections::HashSet;

use crate::classifier::ModeClassifier;
use crate::config::{CommandConfig, DefaultMode};
use crate::types::{ContextTurn, ModeRuntime, Parsed, ResolvedCommand, RoomMessage};

/// `mode_key` used for a resolved help invocation — not a real configured
/// mode, since `helpToken` lives outside the `modes` map.
pub const HELP_MODE_KEY: &str = "__help__";

const NO_CONTEXT_FLAG: &str = "--no-context";
const MODEL_OVERRIDE_PREFIX: char = '@';

pub struct CommandResolver<'a> {
    config: &'a CommandConfig,
}

impl<'a> CommandResolver<'a> {
    pub fn new(config: &'a CommandConfig) -> Self {
        Self { config }
    }

    /// Parse the leading tokens of `text` (single pass, whitespace
    /// separated), stripping an optional `mynick:`/`mynick,` address
    /// prefix first.
    pub fn parse_prefix(&self, text: &str, mynick: &str) -> Parsed {
        let mut parsed = Parsed::default();

        let trimmed = text.trim_start();
        let colon_prefix = format!("{mynick}:");
        let comma_prefix = format!("{mynick},");
        let body = trimmed
            .strip_prefix(colon_prefix.as_str())
            .or_else(|| trimmed.strip_prefix(comma_prefix.as_str()))
            .unwrap_or(trimmed)
            .trim_start();

        let tokens = tokenize(body);
        let mut index = 0;
        let mut trigger_seen = false;
        let mut override_seen = false;

        while index < tokens.len() {
            let (start, end) = tokens[index];
            let token = &body[start..end];

            if !trigger_seen && self.config.flag_tokens.contains(token) {
                parsed.flags.push(token.to_string());
                if token == NO_CONTEXT_FLAG {
                    parsed.no_context = true;
                }
                index += 1;
                continue;
            }

            if !trigger_seen {
                if token == self.config.help_token {
                    parsed.is_help = true;
                    parsed.trigger = Some(token.to_string());
                    trigger_seen = true;
                    index += 1;
                    continue;
                }
                if self.config.mode_owning_trigger(token).is_some() {
                    parsed.trigger = Some(token.to_string());
                    trigger_seen = true;
                    index += 1;
                    continue;
                }
            }

            if !override_seen && token.starts_with(MODEL_OVERRIDE_PREFIX) {
                let candidate = &token[1..];
                if candidate.contains(':') && !candidate.is_empty() {
                    parsed.model_override = Some(candidate.to_string());
                    override_seen = true;
                    index += 1;
                    continue;
                }
            }

            if looks_like_command(token) && !trigger_seen {
                parsed.parse_error = Some(format!("Unknown command {token}"));
            }
            break;
        }

        parsed.query_text = if index < tokens.len() {
            body[tokens[index].0..].trim().to_string()
        } else {
            String::new()
        };

        parsed
    }

    /// True when the message must bypass the steering queue entirely
    /// (spec.md §4.4): help, parse errors, the no-context flag, or a mode
    /// configured with `steering = false`.
    pub fn should_bypass_steering(&self, parsed: &Parsed) -> bool {
        if parsed.is_help || parsed.parse_error.is_some() || parsed.no_context {
            return true;
        }
        if let Some(trigger) = &parsed.trigger {
            if let Some((_, mode)) = self.config.mode_owning_trigger(trigger) {
                if !mode.steering {
                    return true;
                }
            }
        }
        false
    }

    pub fn trigger_for_label(&self, label: &str) -> Option<&str> {
        self.config.mode_classifier.labels.get(label).map(String::as_str)
    }

    pub fn runtime_for_trigger(&self, trigger: &str) -> Option<(&str, ModeRuntime)> {
        self.config
            .mode_owning_trigger(trigger)
            .map(|(mode_key, mode)| (mode_key, runtime_from_mode(mode)))
    }

    /// Resolve the mode/runtime that should execute `message`, applying
    /// the full resolution order: explicit trigger → channel default →
    /// `defaultMode` (trigger or classifier).
    pub async fn resolve(
        &self,
        message: &RoomMessage,
        context: &[ContextTurn],
        classifier: &dyn ModeClassifier,
    ) -> ResolvedCommand {
        let parsed = self.parse_prefix(&message.content, &message.mynick);

        if parsed.is_help {
            return ResolvedCommand {
                mode_key: HELP_MODE_KEY.to_string(),
                selected_trigger: parsed.trigger.clone(),
                selected_automatically: false,
                runtime: ModeRuntime {
                    model: String::new(),
                    reasoning_effort: None,
                    steering: false,
                    auto_reduce_context: false,
                    tool_set: Vec::new(),
                },
                query_text: parsed.query_text,
                no_context: parsed.no_context,
                model_override: parsed.model_override,
                parse_error: parsed.parse_error,
            };
        }

        if let Some(trigger) = parsed.trigger.clone() {
            return self.resolve_from_trigger(&trigger, false, parsed);
        }

        if let Some(trigger) = self.config.channel_modes.get(&message.arc.channel_key()).cloned() {
            return self.resolve_from_trigger(&trigger, false, parsed);
        }

        match &self.config.default_mode {
            DefaultMode::Trigger { token } => self.resolve_from_trigger(token, false, parsed),
            DefaultMode::Classifier { mode_key } => {
                let allowed: HashSet<String> = self
                    .config
                    .mode_classifier
                    .labels
                    .iter()
                    .filter(|(_, trigger)| {
                        self.config
                            .triggers_for_mode(mode_key)
                            .contains(trigger.as_str())
                    })
                    .map(|(label, _)| label.clone())
                    .collect();

                let label = classifier
                    .classify(context, &self.config.mode_classifier, &allowed)
                    .await;
                let trigger = self
                    .config
                    .mode_classifier
                    .labels
                    .get(&label)
                    .or_else(|| self.config.mode_classifier.labels.get(&self.config.mode_classifier.fallback_label))
                    .cloned();

                // Clamp to the configured mode regardless of which mode the
                // resolved trigger nominally belongs to (spec.md §4.4).
                let mode = self.config.modes.get(mode_key);
                ResolvedCommand {
                    mode_key: mode_key.clone(),
                    selected_trigger: trigger,
                    selected_automatically: true,
                    runtime: mode.map(runtime_from_mode).unwrap_or(ModeRuntime {
                        model: String::new(),
                        reasoning_effort: None,
                        steering: false,
                        auto_reduce_context: false,
                        tool_set: Vec::new(),
                    }),
                    query_text: parsed.query_text,
                    no_context: parsed.no_context,
                    model_override: parsed.model_override,
                    parse_error: parsed.parse_error,
                }
            }
        }
    }

    fn resolve_from_trigger(&self, trigger: &str, selected_automatically: bool, parsed: Parsed) -> ResolvedCommand {
        match self.config.mode_owning_trigger(trigger) {
            Some((mode_key, mode)) => ResolvedCommand {
                mode_key: mode_key.to_string(),
                selected_trigger: Some(trigger.to_string()),
                selected_automatically,
                runtime: runtime_from_mode(mode),
                query_text: parsed.query_text,
                no_context: parsed.no_context,
                model_override: parsed.model_override,
                parse_error: parsed.parse_error,
            },
            None => ResolvedCommand {
                mode_key: HELP_MODE_KEY.to_string(),
                selected_trigger: None,
                selected_automatically,
                runtime: ModeRuntime {
                    model: String::new(),
                    reasoning_effort: None,
                    steering: false,
                    auto_reduce_context: false,
                    tool_set: Vec::new(),
                },
                query_text: parsed.query_text,
                no_context: parsed.no_context,
                model_override: parsed.model_override,
                parse_error: Some(format!("trigger '{trigger}' is not bound to a mode")),
            },
        }
    }
}

fn runtime_from_mode(mode: &crate::config::ModeConfig) -> ModeRuntime {
    ModeRuntime {
        model: mode.model.clone(),
        reasoning_effort: mode.reasoning_effort.clone(),
        steering: mode.steering,
        auto_reduce_context: mode.auto_reduce_context,
        tool_set: mode.tools.clone(),
    }
}

fn looks_like_command(token: &str) -> bool {
    token.starts_with('!') || token.starts_with("--")
}

fn tokenize(s: &str) -> Vec<(usize, usize)> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if let Some(s0) = start.take() {
                tokens.push((s0, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s0) = start {
        tokens.push((s0, s.len()));
    }
    tokens
}
