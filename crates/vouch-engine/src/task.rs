//! Reasoning task: one schema-validated provider call with retries
//!
//! Failure handling:
//! - `RateLimited`, `Unavailable`, `Timeout`: exponential backoff
//!   (`base * 2^n`, capped), honoring the provider's `retry_after` hint, up to
//!   `retry.max_attempts` calls in total
//! - `SchemaInvalid`: `retry.schema_retries` immediate corrective retries,
//!   with the validation messages appended to the prompt
//!
//! Every scheduled retry is logged at `warn` and appended to the audit trail.

use crate::audit::AuditKind;
use crate::context::RunContext;
use crate::error::{PipelineError, ProviderError, TaskError};
use crate::provider::Prompt;
use jsonschema::JSONSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validation messages kept in a corrective prompt
const MAX_REPORTED_ERRORS: usize = 5;

/// Definition of a reasoning call
#[derive(Clone)]
pub struct ReasoningTask {
    name: String,
    instructions: String,
    schema: Arc<Value>,
    validator: Arc<JSONSchema>,
}

impl fmt::Debug for ReasoningTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ReasoningTask {
    /// Define a task
    ///
    /// # Errors
    /// `PipelineError::InvalidSchema` if `schema` is not a valid JSON Schema.
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, schema: Value) -> Result<Self, PipelineError> {
        let name = name.into();
        let validator = JSONSchema::compile(&schema).map_err(|e| PipelineError::InvalidSchema {
            task: name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name,
            instructions: instructions.into(),
            schema: Arc::new(schema),
            validator: Arc::new(validator),
        })
    }

    /// Task name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output schema
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T, ProviderError> {
        if let Err(errors) = self.validator.validate(&value) {
            let messages: Vec<String> = errors
                .take(MAX_REPORTED_ERRORS)
                .map(|e| format!("{e} at '{}'", e.instance_path))
                .collect();
            return Err(ProviderError::schema(messages.join("; ")));
        }
        serde_json::from_value(value).map_err(|e| ProviderError::schema(e.to_string()))
    }

    /// Run the task
    ///
    /// `subject` identifies the unit of work in logs and the audit trail
    /// (an item id, a chain and pass).
    ///
    /// # Errors
    /// - `TaskError::Failed` when transient errors exhaust `max_attempts`
    /// - `TaskError::SchemaInvalid` when the corrective retries are spent
    pub async fn run<T: DeserializeOwned>(&self, ctx: &RunContext, subject: &str, context: String) -> Result<T, TaskError> {
        let retry = &ctx.config().retry;
        let mut prompt = Prompt::new(&self.name, &self.instructions, context);
        let mut attempts = 0u32;
        let mut transient_retries = 0u32;
        let mut schema_retries = 0u32;

        loop {
            attempts += 1;
            let result = match ctx.pool().call(&prompt, &self.schema).await {
                Ok(value) => self.decode(value),
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(output) => {
                    debug!(task = %self.name, subject, attempts, "reasoning task succeeded");
                    return Ok(output);
                }
                Err(error) => error,
            };

            match error {
                ProviderError::SchemaInvalid { message } => {
                    if schema_retries >= retry.schema_retries {
                        return Err(TaskError::SchemaInvalid { attempts, message });
                    }
                    schema_retries += 1;
                    warn!(task = %self.name, subject, attempt = attempts, %message, "schema invalid, retrying with correction");
                    ctx.audit().append(
                        AuditKind::Retry,
                        &self.name,
                        format!("{subject}: attempt {attempts}: schema invalid: {message}"),
                    );
                    prompt = prompt.with_correction(message);
                }
                error if error.is_retryable() && attempts < retry.max_attempts => {
                    let delay = error.retry_after().unwrap_or_else(|| retry.backoff(transient_retries));
                    transient_retries += 1;
                    warn!(
                        task = %self.name,
                        subject,
                        attempt = attempts,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "retrying reasoning task"
                    );
                    ctx.audit()
                        .append(AuditKind::Retry, &self.name, format!("{subject}: attempt {attempts}: {error}"));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                error => {
                    return Err(TaskError::Failed {
                        attempts,
                        last_error: error,
                    })
                }
            }
        }
    }
}
