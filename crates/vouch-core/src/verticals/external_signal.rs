//! External-signal vertical: one reasoning stage

use crate::seed::text_key;
use vouch_engine::{Pipeline, PipelineBuilder, PipelineError, ReasoningStage};
use vouch_state::StateKey;

/// Vertical name
pub const NAME: &str = "external_signal";

const INSTRUCTIONS: &str = "Identify the reporting entity and list known external signals \
(litigation, regulatory action, going-concern doubts, adverse press) that bear on the \
reliability of this document.";

/// Single scan over the document text
///
/// # Errors
/// Wiring errors (not expected for the built-in layout).
pub fn pipeline() -> Result<Pipeline, PipelineError> {
    let output = StateKey::new(NAME, "scan");
    PipelineBuilder::new(NAME)
        .seed(text_key())
        .stage(ReasoningStage::findings(output.clone(), INSTRUCTIONS)?.reads(text_key()))
        .terminal(output)
        .build()
}
