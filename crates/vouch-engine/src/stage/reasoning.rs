//! Single reasoning call as a stage

use super::{gather_context, Stage, StageOutput};
use crate::context::RunContext;
use crate::error::{PipelineError, StageError};
use crate::schema::{findings_schema, items_schema, FindingsOutput, ItemsOutput};
use crate::task::ReasoningTask;
use async_trait::async_trait;
use tracing::debug;
use vouch_state::{FindingSet, StateKey, StateValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Produces {
    Findings,
    Items,
}

/// Reads its inputs, makes one reasoning call, writes one key
///
/// Produces either a finding list or, for discovery stages, an item list
/// that a downstream fan-out consumes.
#[derive(Debug, Clone)]
pub struct ReasoningStage {
    output: StateKey,
    inputs: Vec<StateKey>,
    task: ReasoningTask,
    produces: Produces,
}

impl ReasoningStage {
    /// Stage producing findings
    ///
    /// # Errors
    /// `PipelineError::InvalidSchema` (not expected for the built-in schema).
    pub fn findings(output: StateKey, instructions: impl Into<String>) -> Result<Self, PipelineError> {
        let task = ReasoningTask::new(task_name(&output), instructions, findings_schema())?;
        Ok(Self {
            output,
            inputs: Vec::new(),
            task,
            produces: Produces::Findings,
        })
    }

    /// Stage producing items for a fan-out
    ///
    /// # Errors
    /// `PipelineError::InvalidSchema` (not expected for the built-in schema).
    pub fn items(output: StateKey, instructions: impl Into<String>) -> Result<Self, PipelineError> {
        let task = ReasoningTask::new(task_name(&output), instructions, items_schema())?;
        Ok(Self {
            output,
            inputs: Vec::new(),
            task,
            produces: Produces::Items,
        })
    }

    /// Add an input key
    #[inline]
    #[must_use]
    pub fn reads(mut self, key: StateKey) -> Self {
        self.inputs.push(key);
        self
    }
}

/// `{pipeline}.{stage}`, the task name providers see
pub(crate) fn task_name(key: &StateKey) -> String {
    format!("{}.{}", key.pipeline(), key.stage())
}

#[async_trait]
impl Stage for ReasoningStage {
    fn name(&self) -> &str {
        self.output.stage()
    }

    fn inputs(&self) -> Vec<StateKey> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<StateKey> {
        vec![self.output.clone()]
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let handle = ctx.store().claim(&self.output)?;
        let context = gather_context(ctx, &self.inputs)?;
        let subject = self.output.to_string();

        let (value, findings_count) = match self.produces {
            Produces::Findings => {
                let output: FindingsOutput = self.task.run(ctx, &subject, context).await?;
                let count = output.findings.len();
                (StateValue::Findings(FindingSet::new(output.findings)), count)
            }
            Produces::Items => {
                let output: ItemsOutput = self.task.run(ctx, &subject, context).await?;
                let items = output.into_items();
                debug!(key = %self.output, items = items.len(), "items discovered");
                (StateValue::Items(items), 0)
            }
        };

        handle.write(value)?;
        Ok(StageOutput { findings_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, Scripted};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn findings_stage_reads_inputs_and_writes_output() {
        let provider = Arc::new(Scripted::new().respond("signal.scan", |prompt| {
            assert!(prompt.context.contains("doc_text_output"));
            Ok(json!({ "findings": [{ "severity": "pass", "summary": "No adverse news", "detail": "" }] }))
        }));
        let ctx = context(provider.clone());
        let text = StateKey::new("doc", "text");
        ctx.store().set(&text, StateValue::Text("Annual report".into())).unwrap();

        let stage = ReasoningStage::findings(StateKey::new("signal", "scan"), "Scan.")
            .unwrap()
            .reads(text);
        let output = stage.run(&ctx).await.unwrap();

        assert_eq!(output.findings_count, 1);
        let stored = ctx.store().get(&StateKey::new("signal", "scan")).unwrap();
        assert_eq!(stored.findings()[0].summary, "No adverse news");
        assert_eq!(provider.calls("signal.scan"), 1);
    }

    #[tokio::test]
    async fn items_stage_writes_item_list() {
        let provider = Arc::new(Scripted::new().respond("compliance.discover", |_| {
            Ok(json!({ "items": [{ "id": "IAS 1" }, { "id": "IAS 7" }] }))
        }));
        let ctx = context(provider);
        let key = StateKey::new("compliance", "discover");

        ReasoningStage::items(key.clone(), "List standards.")
            .unwrap()
            .run(&ctx)
            .await
            .unwrap();

        let items = ctx.store().get(&key).unwrap();
        assert_eq!(items.as_items().map(<[_]>::len), Some(2));
    }

    #[tokio::test]
    async fn missing_input_fails_the_stage() {
        let ctx = context(Arc::new(Scripted::new()));
        let stage = ReasoningStage::findings(StateKey::new("signal", "scan"), "Scan.")
            .unwrap()
            .reads(StateKey::new("doc", "text"));

        let err = stage.run(&ctx).await.unwrap_err();
        assert!(!err.is_contract_violation());
    }
}
