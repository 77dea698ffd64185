//! Error types for the orchestrator
//!
//! Run outcomes (rejected, complete, failed) are values in
//! [`crate::RunResult`]. These errors cover setup only.

use vouch_engine::{ConfigError, PipelineError};
use vouch_state::StateError;

/// Orchestrator setup errors
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A vertical's pipeline is miswired
    #[error("invalid vertical: {0}")]
    Pipeline(#[from] PipelineError),

    /// Two verticals share a name
    #[error("vertical {0} registered twice")]
    DuplicateVertical(String),

    /// Seed could not be written
    #[error("document seed rejected: {0}")]
    Seed(#[from] StateError),
}
