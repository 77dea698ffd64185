//! Engine configuration
//!
//! Every policy constant lives here rather than in the stages: retry limits,
//! provider concurrency, fan-out batching, refinement shape, numeric
//! tolerance and the gate's bias. Files are TOML; omitted sections keep their
//! defaults.
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//!
//! [gate]
//! reject_confidence = 0.9
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vouch_formula::Tolerance;

/// Upper bound on passes per refinement chain
pub const MAX_PASSES: usize = 8;

/// Retry policy for reasoning tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total calls per task, including the first
    pub max_attempts: u32,
    /// Backoff base in milliseconds
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,
    /// Corrective retries after a schema failure
    pub schema_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
            schema_retries: 1,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `retries_used` earlier retries
    ///
    /// `base * 2^retries_used`, capped at `max_delay_ms`.
    #[must_use]
    pub fn backoff(&self, retries_used: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay_ms.max(self.base_delay_ms);
        let multiplier = 1u64 << retries_used.min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(max_ms))
    }
}

/// Reasoning provider limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Per-call timeout in seconds
    pub call_timeout_secs: u64,
    /// Concurrent calls across the whole run
    pub max_concurrent_calls: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            max_concurrent_calls: 8,
        }
    }
}

impl ProviderConfig {
    /// Per-call timeout
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Fan-out batching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Items per batch
    pub batch_size: usize,
    /// Batches in flight at once
    pub max_parallel_batches: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_parallel_batches: 2,
        }
    }
}

/// Multi-pass refinement shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Independent chains
    pub chains: usize,
    /// Passes per chain
    pub passes: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self { chains: 3, passes: 3 }
    }
}

/// Gate policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum document length in characters
    pub min_content_chars: usize,
    /// Require at least one extracted table
    pub require_table: bool,
    /// Classifier confidence needed to reject
    pub reject_confidence: f64,
    /// Accept when the classifier is unsure or unreachable
    pub accept_when_uncertain: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_content_chars: 500,
            require_table: true,
            reject_confidence: 0.85,
            accept_when_uncertain: true,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry policy
    pub retry: RetryConfig,
    /// Provider limits
    pub provider: ProviderConfig,
    /// Fan-out batching
    pub fan_out: FanOutConfig,
    /// Refinement shape
    pub refinement: RefinementConfig,
    /// Numeric comparison tolerance
    pub tolerance: Tolerance,
    /// Gate policy
    pub gate: GateConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed input, `ConfigError::Invalid` on
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// As [`EngineConfig::from_toml_str`], plus `ConfigError::Io`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With max concurrent provider calls
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.provider.max_concurrent_calls = max;
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.provider.call_timeout_secs = timeout.as_secs();
        self
    }

    /// With fan-out batching
    #[inline]
    #[must_use]
    pub fn with_fan_out(mut self, batch_size: usize, max_parallel_batches: usize) -> Self {
        self.fan_out = FanOutConfig {
            batch_size,
            max_parallel_batches,
        };
        self
    }

    /// With refinement shape
    #[inline]
    #[must_use]
    pub fn with_refinement(mut self, chains: usize, passes: usize) -> Self {
        self.refinement = RefinementConfig { chains, passes };
        self
    }

    /// With numeric tolerance
    #[inline]
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// With gate policy
    #[inline]
    #[must_use]
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.provider.max_concurrent_calls == 0 {
            return invalid("provider.max_concurrent_calls must be at least 1");
        }
        if self.provider.call_timeout_secs == 0 {
            return invalid("provider.call_timeout_secs must be at least 1");
        }
        if self.fan_out.batch_size == 0 {
            return invalid("fan_out.batch_size must be at least 1");
        }
        if self.fan_out.max_parallel_batches == 0 {
            return invalid("fan_out.max_parallel_batches must be at least 1");
        }
        if self.refinement.chains == 0 {
            return invalid("refinement.chains must be at least 1");
        }
        if !(1..=MAX_PASSES).contains(&self.refinement.passes) {
            return Err(ConfigError::Invalid(format!(
                "refinement.passes must be within 1..={MAX_PASSES}"
            )));
        }
        if self.tolerance.absolute.is_sign_negative() || self.tolerance.relative.is_sign_negative() {
            return invalid("tolerance must not be negative");
        }
        if !(0.0..=1.0).contains(&self.gate.reject_confidence) {
            return invalid("gate.reject_confidence must be within 0.0..=1.0");
        }
        Ok(())
    }
}
