//! Testing utilities for the Vouch workspace
//!
//! Shared fakes, fixtures and assertions.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use vouch_engine::{
    EngineConfig, ProgressEvent, ProgressSink, Prompt, ProviderError, ProviderPool, ReasoningProvider, RetryConfig,
    RunContext,
};
use vouch_state::{RawTable, StateStore};

type Responder = Arc<dyn Fn(&Prompt) -> Result<Value, ProviderError> + Send + Sync>;

struct Rule {
    task: String,
    marker: Option<String>,
    remaining: Option<usize>,
    responder: Responder,
}

impl Rule {
    fn matches(&self, prompt: &Prompt) -> bool {
        prompt.task == self.task
            && self.remaining != Some(0)
            && self.marker.as_ref().map_or(true, |m| prompt.context.contains(m.as_str()))
    }
}

/// Provider answering from per-task scripts
///
/// Rules are tried newest first, so failures injected after a default
/// response take precedence. Unscripted tasks return
/// `ProviderError::Unavailable`.
#[derive(Default)]
pub struct ScriptedProvider {
    rules: Mutex<Vec<Rule>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, task: &str, marker: Option<&str>, remaining: Option<usize>, responder: Responder) -> Self {
        self.rules.lock().push(Rule {
            task: task.to_string(),
            marker: marker.map(str::to_string),
            remaining,
            responder,
        });
        self
    }

    /// Answer `task` with a closure
    pub fn on<F>(self, task: &str, responder: F) -> Self
    where
        F: Fn(&Prompt) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        self.push(task, None, None, Arc::new(responder))
    }

    /// Answer `task` with a fixed value
    pub fn reply(self, task: &str, value: Value) -> Self {
        self.on(task, move |_| Ok(value.clone()))
    }

    /// Fail `task` whenever the prompt context contains `marker`
    pub fn fail_when(self, task: &str, marker: &str, error: ProviderError) -> Self {
        self.push(task, Some(marker), None, Arc::new(move |_| Err(error.clone())))
    }

    /// Fail the next `times` calls of `task`
    pub fn fail_times(self, task: &str, times: usize, error: ProviderError) -> Self {
        self.push(task, None, Some(times), Arc::new(move |_| Err(error.clone())))
    }

    /// Calls made for `task`, retries included
    pub fn calls(&self, task: &str) -> usize {
        self.prompts.lock().iter().filter(|p| p.task == task).count()
    }

    /// All calls
    pub fn total_calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Prompts sent for `task`, in call order
    pub fn prompts(&self, task: &str) -> Vec<Prompt> {
        self.prompts.lock().iter().filter(|p| p.task == task).cloned().collect()
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    async fn invoke(&self, prompt: &Prompt, _schema: &Value) -> Result<Value, ProviderError> {
        self.prompts.lock().push(prompt.clone());
        let responder = {
            let mut rules = self.rules.lock();
            let rule = rules.iter_mut().rev().find(|r| r.matches(prompt));
            rule.map(|r| {
                if let Some(n) = r.remaining.as_mut() {
                    *n -= 1;
                }
                r.responder.clone()
            })
        };
        match responder {
            Some(responder) => responder(prompt),
            None => Err(ProviderError::Unavailable(format!("no script for {}", prompt.task))),
        }
    }
}

/// Progress sink that keeps every event
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// `(vertical, stage)` for every completed stage
    pub fn completed_stages(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::StageCompleted { vertical, stage, .. } => Some((vertical.clone(), stage.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn started_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::StageStarted { .. }))
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

/// `{"findings": [...]}` with one entry per `(severity, summary)`
pub fn findings_json(entries: &[(&str, &str)]) -> Value {
    let findings: Vec<Value> = entries
        .iter()
        .map(|(severity, summary)| json!({ "severity": severity, "summary": summary, "detail": "" }))
        .collect();
    json!({ "findings": findings })
}

/// Config with zero backoff, two attempts and small fan-out batches
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_retry(RetryConfig {
            max_attempts: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
            schema_retries: 1,
        })
        .with_fan_out(2, 2)
        .with_refinement(2, 2)
}

pub fn run_context(provider: Arc<dyn ReasoningProvider>, config: EngineConfig) -> RunContext {
    let pool = ProviderPool::from_config(provider, &config.provider);
    RunContext::new(StateStore::new(), Arc::new(pool), Arc::new(config))
}

/// Revenue table whose total row is off by 10: `100 + 50` reported as `140`
pub fn mismatched_table() -> RawTable {
    RawTable::new(
        "income",
        vec![
            vec!["", "Product", "Service", "Total"],
            vec!["Q1", "100", "50", "140"],
            vec!["Q2", "80", "20", "100"],
        ],
    )
    .with_title("Revenue by quarter")
}

/// Table where every row adds up
pub fn consistent_table(id: &str) -> RawTable {
    RawTable::new(
        id,
        vec![
            vec!["", "Opening", "Movement", "Closing"],
            vec!["Cash", "200", "25", "225"],
            vec!["Debt", "(50)", "10", "(40)"],
        ],
    )
}

/// Prose long enough to clear the default gate floor
pub fn document_text() -> String {
    "The group reported revenue growth across both segments. ".repeat(12)
}
