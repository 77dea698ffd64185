//! Error types for the execution engine
//!
//! Layers, innermost first:
//! - [`ProviderError`]: what the injected reasoning provider returns
//! - [`TaskError`]: a reasoning task after its retry policy is exhausted
//! - [`StageError`]: a stage failed; fails the enclosing vertical only
//! - [`PipelineError`]: wiring problems found at build time, or a stage failure
//!
//! A state contract violation travels through all layers unchanged and is
//! the only error that aborts a whole run.

use std::time::Duration;
use vouch_state::StateError;

/// Errors returned by a reasoning provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider asked us to slow down
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    RateLimited {
        /// Backoff hint from the provider
        retry_after: Option<Duration>,
    },

    /// Output did not match the requested schema
    #[error("output failed schema validation: {message}")]
    SchemaInvalid {
        /// Validation messages
        message: String,
    },

    /// Provider unreachable or returned a server error
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded the per-call timeout
    #[error("provider call timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ProviderError {
    /// Check if the call may be retried with backoff
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Backoff hint, if the provider gave one
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Schema failure from a message
    #[inline]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaInvalid {
            message: message.into(),
        }
    }
}

/// Terminal failure of a reasoning task
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Retries exhausted on a transient error
    #[error("task failed after {attempts} attempt(s): {last_error}")]
    Failed {
        /// Calls made
        attempts: u32,
        /// Error from the final call
        last_error: ProviderError,
    },

    /// Output still invalid after the corrective retry
    #[error("task output invalid after {attempts} attempt(s): {message}")]
    SchemaInvalid {
        /// Calls made
        attempts: u32,
        /// Validation messages from the final call
        message: String,
    },

    /// State contract violation while the task read or wrote state
    #[error(transparent)]
    Contract(#[from] StateError),
}

impl TaskError {
    /// Calls made before giving up
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } | Self::SchemaInvalid { attempts, .. } => *attempts,
            Self::Contract(_) => 0,
        }
    }

    /// Check if this error must abort the run
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(e) if e.is_contract_violation())
    }
}

/// Stage failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// Reasoning task failed
    #[error("task failed: {0}")]
    Task(#[from] TaskError),

    /// State store error
    #[error(transparent)]
    State(#[from] StateError),

    /// Input present but unusable
    #[error("input {key} is unusable: {reason}")]
    InvalidInput {
        /// Rendered key
        key: String,
        /// What was wrong
        reason: String,
    },
}

impl StageError {
    /// Check if this error must abort the run
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        match self {
            Self::Task(e) => e.is_contract_violation(),
            Self::State(e) => e.is_contract_violation(),
            Self::InvalidInput { .. } => false,
        }
    }
}

/// Pipeline errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Pipeline has no stages
    #[error("pipeline {0} has no stages")]
    Empty(String),

    /// Stage reads a key nothing upstream produces
    #[error("stage {stage} reads {key}, which no upstream stage produces")]
    UnresolvedInput {
        /// Stage name
        stage: String,
        /// Rendered key
        key: String,
    },

    /// Stage reads a per-item key
    #[error("stage {stage} depends on per-item key {key}")]
    DynamicInput {
        /// Stage name
        stage: String,
        /// Rendered key
        key: String,
    },

    /// Two producers for one key
    #[error("{key} is produced more than once")]
    DuplicateOutput {
        /// Rendered key
        key: String,
    },

    /// Output schema of a task does not compile
    #[error("invalid output schema for task {task}: {message}")]
    InvalidSchema {
        /// Task name
        task: String,
        /// Compiler message
        message: String,
    },

    /// Terminal key is not produced by the pipeline
    #[error("terminal key {0} is not produced by any stage")]
    UnknownTerminal(String),

    /// A stage failed at run time
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// Stage name
        stage: String,
        /// Underlying failure
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    /// Check if this error must abort the run
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Stage { source, .. } if source.is_contract_violation())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML did not parse
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_retryability() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Unavailable("503".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ProviderError::schema("missing field").is_retryable());
    }

    #[test]
    fn rate_limit_display_includes_hint() {
        let err = ProviderError::RateLimited {
            retry_after: Some(Duration::from_millis(1500)),
        };
        assert_eq!(err.to_string(), "rate limited (retry after 1500ms)");
        assert_eq!(ProviderError::RateLimited { retry_after: None }.to_string(), "rate limited");
    }

    #[test]
    fn contract_violation_propagates_through_layers() {
        let violation = StateError::DoubleClaim { key: "p_s_output".into() };
        let stage = StageError::Task(TaskError::Contract(violation.clone()));
        assert!(stage.is_contract_violation());

        let pipeline = PipelineError::Stage {
            stage: "s".into(),
            source: StageError::State(violation),
        };
        assert!(pipeline.is_contract_violation());

        let failed = PipelineError::Stage {
            stage: "s".into(),
            source: StageError::Task(TaskError::Failed {
                attempts: 4,
                last_error: ProviderError::Unavailable("down".into()),
            }),
        };
        assert!(!failed.is_contract_violation());
    }

    #[test]
    fn missing_key_is_not_a_violation() {
        let err = StageError::State(StateError::Missing { key: "k".into() });
        assert!(!err.is_contract_violation());
    }
}
