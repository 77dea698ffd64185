//! Compliance vertical
//!
//! A discovery call lists the disclosure standards the document falls
//! under; each standard is then assessed by its own worker.

use crate::seed::text_key;
use std::sync::Arc;
use vouch_engine::{FanOutStage, Pipeline, PipelineBuilder, PipelineError, ReasoningItemTask, ReasoningStage};
use vouch_state::StateKey;

/// Vertical name
pub const NAME: &str = "compliance";

const DISCOVER: &str = "List every disclosure standard that applies to this document. \
Return one item per standard with its identifier as the id and a short scope note.";

const ASSESS: &str = "Assess whether the document meets the disclosure requirements of the \
given standard. Report each missing or deficient disclosure as a finding; report a single \
pass finding when the standard is fully met.";

/// Discovery then fan-out per standard
///
/// # Errors
/// Wiring errors (not expected for the built-in layout).
pub fn pipeline() -> Result<Pipeline, PipelineError> {
    let standards = StateKey::new(NAME, "standards");
    let assess = StateKey::new(NAME, "assess");
    let task = ReasoningItemTask::findings(&assess, ASSESS)?;

    PipelineBuilder::new(NAME)
        .seed(text_key())
        .stage(ReasoningStage::items(standards.clone(), DISCOVER)?.reads(text_key()))
        .stage(FanOutStage::new(assess.clone(), standards, Arc::new(task)).reads(text_key()))
        .terminal(assess)
        .build()
}
