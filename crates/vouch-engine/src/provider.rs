//! Reasoning provider seam
//!
//! The engine never talks to a model directly. Callers inject a
//! [`ReasoningProvider`]; the engine wraps every call with the global
//! concurrency bound, a timeout, schema validation and the retry policy.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured prompt payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Task name, stable across retries (`numeric.anchor`, `logic.pass`)
    pub task: String,
    /// What the provider is asked to do
    pub instructions: String,
    /// State-derived context
    pub context: String,
    /// Correction appended after a schema failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

impl Prompt {
    /// Create a prompt
    #[must_use]
    pub fn new(task: impl Into<String>, instructions: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            instructions: instructions.into(),
            context: context.into(),
            correction: None,
        }
    }

    /// With corrective instruction
    #[inline]
    #[must_use]
    pub fn with_correction(mut self, correction: impl Into<String>) -> Self {
        self.correction = Some(correction.into());
        self
    }

    /// Flatten to a single text block
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{}\n\n{}", self.instructions, self.context);
        if let Some(correction) = &self.correction {
            out.push_str("\n\nYour previous answer was rejected: ");
            out.push_str(correction);
            out.push_str("\nRespond again, strictly following the output schema.");
        }
        out
    }
}

/// Injected reasoning capability
///
/// Implementations map a prompt to a JSON value that should satisfy
/// `schema`. The engine validates the value itself, so implementations may
/// return whatever the model produced and leave validation to the caller.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Invoke the provider once
    ///
    /// # Errors
    /// Any [`ProviderError`]; retryable ones are retried by the caller.
    async fn invoke(&self, prompt: &Prompt, schema: &Value) -> Result<Value, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_is_appended_on_render() {
        let prompt = Prompt::new("logic.pass", "Find contradictions.", "doc text");
        assert_eq!(prompt.render(), "Find contradictions.\n\ndoc text");

        let corrected = prompt.with_correction("missing field `findings`");
        assert!(corrected.render().contains("missing field `findings`"));
        assert_eq!(corrected.task, "logic.pass");
    }
}
