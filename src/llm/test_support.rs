//! Scriptable [`LlmAdapter`] test double: returns a fixed sequence of
//! [`AssistantMessage`]s regardless of the prompt, recording how many times
//! it was called. Used wherever a test needs a real tool loop to run
//! without a real model behind it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BotError;

use super::{AssistantMessage, CompletionRequest, LlmAdapter};

#[derive(Clone)]
pub struct ScriptedLlmAdapter {
    script: Arc<Mutex<Vec<AssistantMessage>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedLlmAdapter {
    pub fn new(script: Vec<AssistantMessage>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlmAdapter {
    fn resolve(&self, _model: &str) -> Result<(), BotError> {
        Ok(())
    }

    async fn complete_simple(&self, _request: CompletionRequest) -> Result<AssistantMessage, BotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;
        if script.is_empty() {
            return Err(BotError::EmptyCompletion);
        }
        Ok(script.remove(0))
    }
}
