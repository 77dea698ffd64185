//! Logic vertical: multi-pass refinement over the narrative

use crate::seed::text_key;
use std::sync::Arc;
use vouch_engine::{Pipeline, PipelineBuilder, PipelineError, ReasoningPassTask, RefinementStage};
use vouch_state::StateKey;

/// Vertical name
pub const NAME: &str = "logic";

const INSTRUCTIONS: &str = "Read the document narrative and report statements that contradict \
each other, conclusions that do not follow from the figures cited, and claims that rest on \
missing information. Cite where each issue appears.";

/// Refinement chains over the document text
///
/// # Errors
/// Wiring errors (not expected for the built-in layout).
pub fn pipeline() -> Result<Pipeline, PipelineError> {
    let output = StateKey::new(NAME, "review");
    let task = ReasoningPassTask::findings(&output, INSTRUCTIONS)?;
    PipelineBuilder::new(NAME)
        .seed(text_key())
        .stage(RefinementStage::new(output.clone(), Arc::new(task)).reads(text_key()))
        .terminal(output)
        .build()
}
