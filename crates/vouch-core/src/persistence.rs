//! Persistence seam
//!
//! The core keeps state in memory for the lifetime of a run. Durable storage
//! is an injected collaborator; its failures are logged by the orchestrator
//! and never change the run's outcome.

use crate::result::RunResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use vouch_state::StateValue;

/// Persistence failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("persistence failed: {0}")]
pub struct PersistenceError(pub String);

/// Receiver of finished runs
#[async_trait]
pub trait RunPersistence: Send + Sync {
    /// Store the run result and the final state snapshot
    ///
    /// # Errors
    /// A [`PersistenceError`]; logged, not propagated.
    async fn persist(&self, result: &RunResult, state: &BTreeMap<String, StateValue>) -> Result<(), PersistenceError>;
}
