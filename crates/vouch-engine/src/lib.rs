//! Vouch Engine
//!
//! Execution primitives for document analysis runs:
//! - [`ReasoningTask`]: one schema-validated call to an injected
//!   [`ReasoningProvider`], with bounded retries
//! - [`ProviderPool`]: the global bound on concurrent provider calls
//! - stages: [`ReasoningStage`], [`FanOutStage`], [`RefinementStage`] and the
//!   short-circuiting [`GateStage`]
//! - [`Pipeline`]: sequential and parallel composition with wiring checked at
//!   build time
//!
//! Stages talk only through the [`vouch_state::StateStore`] carried by a
//! [`RunContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use vouch_engine::{PipelineBuilder, ReasoningStage, RunContext};
//! use vouch_state::StateKey;
//!
//! # async fn example(ctx: RunContext) -> Result<(), Box<dyn std::error::Error>> {
//! let text = StateKey::new("document", "text");
//! let pipeline = PipelineBuilder::new("external_signal")
//!     .seed(text.clone())
//!     .stage(ReasoningStage::findings(StateKey::new("external_signal", "scan"), "Look for adverse signals.")?.reads(text))
//!     .build()?;
//!
//! let report = pipeline.run(&ctx).await?;
//! println!("{} stages", report.stages.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod provider;
pub mod schema;
pub mod stage;
pub mod task;

#[cfg(test)]
mod testing;

pub use audit::{AuditEntry, AuditError, AuditKind, AuditTrail};
pub use config::{
    EngineConfig, FanOutConfig, GateConfig, ProviderConfig, RefinementConfig, RetryConfig, MAX_PASSES,
};
pub use context::RunContext;
pub use error::{ConfigError, PipelineError, ProviderError, StageError, TaskError};
pub use pipeline::{Node, Pipeline, PipelineBuilder, PipelineReport, StageRecord};
pub use pool::{PoolStats, ProviderPool};
pub use progress::{ChannelSink, NoopSink, ProgressEvent, ProgressSink};
pub use provider::{Prompt, ReasoningProvider};
pub use stage::{
    merge_outcomes, preflight, Acceptance, FanOutStage, GateCheck, GateDecision, GateRejection, GateStage,
    ItemTask, PassInput, PassTask, ProceedToken, ReasoningItemTask, ReasoningPassTask, ReasoningStage,
    RefinementStage, Stage, StageOutput, WorkerOutcome,
};
pub use task::ReasoningTask;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
