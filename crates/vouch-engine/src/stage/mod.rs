//! Stages: the units a pipeline is composed of
//!
//! Every stage declares the keys it reads and the keys it produces, so a
//! pipeline can check its wiring before anything runs. Per-item keys written
//! by fan-out workers are not declared; only their aggregate is.

mod aggregate;
mod fan_out;
mod gate;
mod reasoning;
mod refinement;

pub use aggregate::{merge_outcomes, WorkerOutcome};
pub use fan_out::{FanOutStage, ItemTask, ReasoningItemTask};
pub use gate::{preflight, Acceptance, GateCheck, GateDecision, GateRejection, GateStage, ProceedToken};
pub use reasoning::ReasoningStage;
pub use refinement::{PassInput, PassTask, ReasoningPassTask, RefinementStage};

use crate::context::RunContext;
use crate::error::StageError;
use async_trait::async_trait;
use vouch_state::StateKey;

/// What a stage reports when it completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageOutput {
    /// Findings in the stage's output
    pub findings_count: usize,
}

/// One pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, unique within its pipeline
    fn name(&self) -> &str;

    /// Keys read; never per-item keys
    fn inputs(&self) -> Vec<StateKey>;

    /// Keys written and claimed by this stage
    fn outputs(&self) -> Vec<StateKey>;

    /// Run to completion
    ///
    /// # Errors
    /// A [`StageError`]; the enclosing vertical fails, and the whole run
    /// fails if it is a contract violation.
    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError>;
}

/// Render input keys as prompt context, one section per key
pub(crate) fn gather_context(ctx: &RunContext, inputs: &[StateKey]) -> Result<String, StageError> {
    let mut sections = Vec::with_capacity(inputs.len());
    for key in inputs {
        let value = ctx.store().require(key)?;
        sections.push(format!("## {key}\n{}", value.to_prompt_context()));
    }
    Ok(sections.join("\n\n"))
}
