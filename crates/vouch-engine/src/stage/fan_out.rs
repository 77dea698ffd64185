//! Fan-out: one worker per item, then one aggregate
//!
//! Items are split into batches of `fan_out.batch_size`; at most
//! `fan_out.max_parallel_batches` batches run at once, and the items of a
//! batch run concurrently. Provider calls are further bounded by the global
//! pool.
//!
//! Each worker writes exactly one per-item key, `{key}:{item_id}`: its
//! findings, or a failure record when its task failed. The aggregate key is
//! claimed up front and written only after every per-item key exists.
//!
//! Item ids must be unique within a source. A repeated id is not run: it is
//! counted as a failed item of the aggregate and writes no key of its own.

use super::aggregate::{merge_outcomes, WorkerOutcome};
use super::reasoning::task_name;
use super::{gather_context, Stage, StageOutput};
use crate::context::RunContext;
use crate::error::{PipelineError, StageError, TaskError};
use crate::schema::{findings_schema, FindingsOutput};
use crate::task::ReasoningTask;
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use vouch_state::{FailureRecord, FindingSet, Item, StateKey, StateValue, WriteHandle};

/// Work done for one item
#[async_trait]
pub trait ItemTask: Send + Sync {
    /// Produce findings for `item`
    ///
    /// `context` is the rendered shared input of the stage.
    ///
    /// # Errors
    /// A [`TaskError`]; it is recorded against the item, not raised, unless
    /// it is a contract violation.
    async fn run(&self, ctx: &RunContext, item: &Item, context: &str) -> Result<FindingSet, TaskError>;
}

/// Item task backed by one reasoning call
///
/// Findings returned without a subject are attributed to the item.
#[derive(Debug, Clone)]
pub struct ReasoningItemTask {
    task: ReasoningTask,
}

impl ReasoningItemTask {
    /// Wrap a task whose output is a finding list
    #[inline]
    #[must_use]
    pub fn new(task: ReasoningTask) -> Self {
        Self { task }
    }

    /// Task producing findings for the item, named after `output`
    ///
    /// # Errors
    /// `PipelineError::InvalidSchema` (not expected for the built-in schema).
    pub fn findings(output: &StateKey, instructions: impl Into<String>) -> Result<Self, PipelineError> {
        Ok(Self::new(ReasoningTask::new(task_name(output), instructions, findings_schema())?))
    }
}

#[async_trait]
impl ItemTask for ReasoningItemTask {
    async fn run(&self, ctx: &RunContext, item: &Item, context: &str) -> Result<FindingSet, TaskError> {
        let payload = serde_json::to_string_pretty(&item.payload).unwrap_or_default();
        let prompt_context = format!("{context}\n\n## item {}\n{payload}", item.id);
        let output: FindingsOutput = self.task.run(ctx, &item.id, prompt_context).await?;
        // unattributed findings are about the item itself
        let findings = output
            .findings
            .into_iter()
            .map(|f| match f.subject {
                Some(_) => f,
                None => f.with_subject(item.id.clone()),
            })
            .collect();
        Ok(FindingSet::new(findings))
    }
}

/// Map-reduce over an item list
pub struct FanOutStage {
    output: StateKey,
    source: StateKey,
    inputs: Vec<StateKey>,
    task: Arc<dyn ItemTask>,
}

impl fmt::Debug for FanOutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutStage")
            .field("output", &self.output)
            .field("source", &self.source)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl FanOutStage {
    /// Fan out over the items (or tables) stored at `source`
    #[must_use]
    pub fn new(output: StateKey, source: StateKey, task: Arc<dyn ItemTask>) -> Self {
        Self {
            output,
            source,
            inputs: Vec::new(),
            task,
        }
    }

    /// Add a shared context key, rendered into every worker's context
    #[inline]
    #[must_use]
    pub fn reads(mut self, key: StateKey) -> Self {
        self.inputs.push(key);
        self
    }

    async fn run_batch(
        &self,
        ctx: &RunContext,
        batch: Vec<(Item, WriteHandle)>,
        context: &str,
    ) -> Result<(), StageError> {
        let workers = batch.into_iter().map(|(item, handle)| async move {
            let value = match self.task.run(ctx, &item, context).await {
                Ok(set) => StateValue::Findings(set),
                Err(e) if e.is_contract_violation() => return Err(StageError::Task(e)),
                Err(e) => {
                    warn!(key = %handle.key(), item_id = %item.id, error = %e, "fan-out item failed");
                    StateValue::Failure(FailureRecord {
                        item_id: item.id.clone(),
                        error: e.to_string(),
                        attempts: e.attempts(),
                    })
                }
            };
            handle.write(value)?;
            Ok(())
        });

        join_all(workers).await.into_iter().collect()
    }

    /// `order` holds every source item in position; repeats carry their failure
    fn collect_outcomes(
        &self,
        ctx: &RunContext,
        order: Vec<(String, Option<FailureRecord>)>,
    ) -> Result<Vec<WorkerOutcome>, StageError> {
        let mut settled: HashMap<String, StateValue> = ctx
            .store()
            .list_prefix(&self.output)
            .into_iter()
            .filter_map(|(key, value)| key.item().map(|id| (id.to_string(), value)))
            .collect();

        order
            .into_iter()
            .map(|(id, repeated)| {
                if let Some(record) = repeated {
                    return Ok(WorkerOutcome {
                        id,
                        output: FindingSet::default(),
                        failure: Some(record),
                    });
                }
                let value = settled.remove(&id).ok_or_else(|| StageError::State(vouch_state::StateError::Missing {
                    key: self.output.for_item(id.clone()).to_string(),
                }))?;
                Ok(match value {
                    StateValue::Failure(record) => WorkerOutcome {
                        id,
                        output: FindingSet::default(),
                        failure: Some(record),
                    },
                    StateValue::Findings(set) => WorkerOutcome {
                        id,
                        output: set,
                        failure: None,
                    },
                    other => WorkerOutcome {
                        id,
                        output: FindingSet::new(other.findings().to_vec())
                            .with_discrepancies(other.discrepancies().to_vec()),
                        failure: None,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl Stage for FanOutStage {
    fn name(&self) -> &str {
        self.output.stage()
    }

    fn inputs(&self) -> Vec<StateKey> {
        let mut inputs = vec![self.source.clone()];
        inputs.extend(self.inputs.iter().cloned());
        inputs
    }

    fn outputs(&self) -> Vec<StateKey> {
        vec![self.output.clone()]
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let source = ctx.store().require(&self.source)?;
        let items = source.to_items().ok_or_else(|| StageError::InvalidInput {
            key: self.source.to_string(),
            reason: format!("expected items or tables, found {}", source.kind()),
        })?;

        let aggregate = ctx.store().claim(&self.output)?;
        let mut order = Vec::with_capacity(items.len());
        let mut seen = HashSet::with_capacity(items.len());
        let mut claimed = Vec::with_capacity(items.len());
        for item in items {
            if !seen.insert(item.id.clone()) {
                warn!(key = %self.output, item_id = %item.id, "duplicate fan-out item skipped");
                let record = FailureRecord {
                    item_id: item.id.clone(),
                    error: "duplicate item id".into(),
                    attempts: 0,
                };
                order.push((item.id, Some(record)));
                continue;
            }
            let handle = ctx.store().claim(&self.output.for_item(item.id.clone()))?;
            order.push((item.id.clone(), None));
            claimed.push((item, handle));
        }

        let context = gather_context(ctx, &self.inputs)?;
        let batch_size = ctx.config().fan_out.batch_size.max(1);
        let parallel = ctx.config().fan_out.max_parallel_batches.max(1);

        let mut batches = Vec::with_capacity(claimed.len().div_ceil(batch_size));
        let mut rest = claimed.into_iter().peekable();
        while rest.peek().is_some() {
            batches.push(rest.by_ref().take(batch_size).collect::<Vec<_>>());
        }

        info!(key = %self.output, items = order.len(), batches = batches.len(), "fan-out started");

        let settled: Vec<Result<(), StageError>> = stream::iter(batches)
            .map(|batch| self.run_batch(ctx, batch, &context))
            .buffer_unordered(parallel)
            .collect()
            .await;
        settled.into_iter().collect::<Result<(), StageError>>()?;

        let merged = merge_outcomes(self.collect_outcomes(ctx, order)?, ctx.dedup());
        let findings_count = merged.findings.len();
        if merged.is_partial() {
            warn!(key = %self.output, failed = merged.failed, total = merged.total, "fan-out partially failed");
        }
        aggregate.write(StateValue::Aggregate(merged))?;

        Ok(StageOutput { findings_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::testing::{context, Scripted};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vouch_state::{Finding, Severity};

    fn items(n: usize) -> StateValue {
        StateValue::Items((1..=n).map(|i| Item::new(format!("item-{i}"), json!({ "n": i }))).collect())
    }

    /// Records peak concurrency and fails one item
    #[derive(Default)]
    struct Tracker {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ItemTask for Tracker {
        async fn run(&self, _ctx: &RunContext, item: &Item, _context: &str) -> Result<FindingSet, TaskError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if item.id == "item-3" {
                return Err(TaskError::Failed {
                    attempts: 2,
                    last_error: ProviderError::Unavailable("down".into()),
                });
            }
            Ok(FindingSet::new(vec![Finding::new(Severity::Warning, format!("issue in {}", item.id), "")]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_item_is_recorded_and_aggregate_is_partial() {
        let ctx = context(Arc::new(Scripted::new()));
        let source = StateKey::new("compliance", "discover");
        ctx.store().set(&source, items(5)).unwrap();

        let tracker = Arc::new(Tracker::default());
        let stage = FanOutStage::new(StateKey::new("compliance", "check"), source, tracker.clone());
        let output = stage.run(&ctx).await.unwrap();

        assert_eq!(output.findings_count, 4);
        // batch_size 2, two batches in flight
        assert!(tracker.peak.load(Ordering::SeqCst) <= 4);

        let key = StateKey::new("compliance", "check");
        assert_eq!(ctx.store().list_prefix(&key).len(), 5);
        let failure = ctx.store().get(&key.for_item("item-3")).unwrap();
        assert_eq!(failure.kind(), "failure");

        let StateValue::Aggregate(agg) = ctx.store().get(&key).unwrap() else {
            panic!("expected aggregate");
        };
        assert_eq!((agg.total, agg.failed), (5, 1));
        let summaries: Vec<_> = agg.findings.iter().map(|f| f.summary.as_str()).collect();
        assert_eq!(summaries, vec!["issue in item-1", "issue in item-2", "issue in item-4", "issue in item-5"]);
    }

    #[tokio::test]
    async fn duplicate_item_ids_are_recorded_as_failures() {
        let ctx = context(Arc::new(Scripted::new()));
        let source = StateKey::new("c", "discover");
        ctx.store()
            .set(
                &source,
                StateValue::Items(vec![
                    Item::new("a", json!({})),
                    Item::new("b", json!({})),
                    Item::new("a", json!({})),
                ]),
            )
            .unwrap();

        let key = StateKey::new("c", "check");
        let output = FanOutStage::new(key.clone(), source, Arc::new(Tracker::default()))
            .run(&ctx)
            .await
            .unwrap();
        assert_eq!(output.findings_count, 2);
        assert_eq!(ctx.store().list_prefix(&key).len(), 2);

        let StateValue::Aggregate(agg) = ctx.store().get(&key).unwrap() else {
            panic!("expected aggregate");
        };
        assert_eq!((agg.total, agg.failed), (3, 1));
        assert_eq!(agg.failures[0].item_id, "a");
        assert_eq!(agg.failures[0].error, "duplicate item id");
    }

    #[tokio::test]
    async fn reasoning_items_see_their_payload() {
        let provider = Arc::new(Scripted::new().respond("c.check", |prompt| {
            let id = if prompt.context.contains("## item b") { "b" } else { "a" };
            Ok(json!({ "findings": [{ "severity": "pass", "summary": format!("checked {id}"), "detail": "" }] }))
        }));
        let ctx = context(provider.clone());
        let source = StateKey::new("c", "discover");
        ctx.store()
            .set(&source, StateValue::Items(vec![Item::new("a", json!({})), Item::new("b", json!({}))]))
            .unwrap();

        let output_key = StateKey::new("c", "check");
        let task = ReasoningItemTask::findings(&output_key, "Check.").unwrap();
        let output = FanOutStage::new(output_key, source, Arc::new(task)).run(&ctx).await.unwrap();

        assert_eq!(output.findings_count, 2);
        assert_eq!(provider.calls("c.check"), 2);
    }

    #[tokio::test]
    async fn non_item_source_is_invalid_input() {
        let ctx = context(Arc::new(Scripted::new()));
        let source = StateKey::new("c", "discover");
        ctx.store().set(&source, StateValue::Text("x".into())).unwrap();

        let err = FanOutStage::new(StateKey::new("c", "check"), source, Arc::new(Tracker::default()))
            .run(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::InvalidInput { .. }));
    }
}
