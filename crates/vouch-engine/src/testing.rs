//! In-crate fakes for unit tests

use crate::config::{EngineConfig, RetryConfig};
use crate::context::RunContext;
use crate::error::ProviderError;
use crate::pool::ProviderPool;
use crate::provider::{Prompt, ReasoningProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use vouch_state::StateStore;

type Responder = Box<dyn Fn(&Prompt) -> Result<Value, ProviderError> + Send + Sync>;

/// Provider answering per task name
#[derive(Default)]
pub(crate) struct Scripted {
    responders: HashMap<String, Responder>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Scripted {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond<F>(mut self, task: &str, responder: F) -> Self
    where
        F: Fn(&Prompt) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        self.responders.insert(task.to_string(), Box::new(responder));
        self
    }

    pub(crate) fn calls(&self, task: &str) -> usize {
        self.calls.lock().get(task).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ReasoningProvider for Scripted {
    async fn invoke(&self, prompt: &Prompt, _schema: &Value) -> Result<Value, ProviderError> {
        *self.calls.lock().entry(prompt.task.clone()).or_default() += 1;
        match self.responders.get(&prompt.task) {
            Some(responder) => responder(prompt),
            None => Err(ProviderError::Unavailable(format!("no script for {}", prompt.task))),
        }
    }
}

/// Context with zero backoff and two attempts per task
pub(crate) fn context(provider: Arc<dyn ReasoningProvider>) -> RunContext {
    let config = EngineConfig::default()
        .with_retry(RetryConfig {
            max_attempts: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
            schema_retries: 1,
        })
        .with_fan_out(2, 2)
        .with_refinement(2, 3);
    let pool = ProviderPool::from_config(provider, &config.provider);
    RunContext::new(StateStore::new(), Arc::new(pool), Arc::new(config)).for_vertical("test")
}
