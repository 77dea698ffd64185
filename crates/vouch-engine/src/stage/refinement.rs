//! Multi-pass refinement
//!
//! `chains` independent chains run in parallel. Within a chain, passes are a
//! fold over the pass index: pass `k` sees the base context plus the findings
//! of pass `k - 1` of the same chain, never another chain's. The number of
//! passes is capped at [`MAX_PASSES`].
//!
//! Every pass output is appended to the audit trail. A chain whose pass
//! fails stops there, keeps its last good output and counts as failed.
//! Chain-final outputs are written to `{key}:chain-{c}` and merged into the
//! aggregate with the run's dedup rule.

use super::aggregate::{merge_outcomes, WorkerOutcome};
use super::reasoning::task_name;
use super::{gather_context, Stage, StageOutput};
use crate::audit::AuditKind;
use crate::config::MAX_PASSES;
use crate::context::RunContext;
use crate::error::{PipelineError, StageError, TaskError};
use crate::schema::{findings_schema, FindingsOutput};
use crate::task::ReasoningTask;
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use vouch_state::{FailureRecord, Finding, FindingSet, StateKey, StateValue};

/// Input to one pass
#[derive(Debug, Clone, Copy)]
pub struct PassInput<'a> {
    /// Chain index
    pub chain: usize,
    /// Pass index, from 0
    pub pass: usize,
    /// Rendered stage inputs
    pub context: &'a str,
    /// Findings of the previous pass of this chain; empty for pass 0
    pub previous: &'a [Finding],
}

/// Work done by one pass
#[async_trait]
pub trait PassTask: Send + Sync {
    /// Produce the refined finding list
    ///
    /// # Errors
    /// A [`TaskError`]; the chain stops and keeps its previous output.
    async fn run_pass(&self, ctx: &RunContext, input: PassInput<'_>) -> Result<Vec<Finding>, TaskError>;
}

/// Pass task backed by one reasoning call
#[derive(Debug, Clone)]
pub struct ReasoningPassTask {
    task: ReasoningTask,
}

impl ReasoningPassTask {
    /// Wrap a task whose output is a finding list
    #[inline]
    #[must_use]
    pub fn new(task: ReasoningTask) -> Self {
        Self { task }
    }

    /// Task producing findings, named after `output`
    ///
    /// # Errors
    /// `PipelineError::InvalidSchema` (not expected for the built-in schema).
    pub fn findings(output: &StateKey, instructions: impl Into<String>) -> Result<Self, PipelineError> {
        Ok(Self::new(ReasoningTask::new(task_name(output), instructions, findings_schema())?))
    }
}

#[async_trait]
impl PassTask for ReasoningPassTask {
    async fn run_pass(&self, ctx: &RunContext, input: PassInput<'_>) -> Result<Vec<Finding>, TaskError> {
        let mut context = input.context.to_string();
        if input.pass > 0 {
            let previous = serde_json::to_string_pretty(input.previous).unwrap_or_default();
            context.push_str(
                "\n\n## Findings from your previous pass\n\
                 Keep, refine or drop each of them, and add anything missed. \
                 Do not add findings unsupported by the document.\n",
            );
            context.push_str(&previous);
        }
        let subject = format!("chain-{}/pass-{}", input.chain, input.pass);
        let output: FindingsOutput = self.task.run(ctx, &subject, context).await?;
        Ok(output.findings)
    }
}

/// N parallel chains of M sequential passes
pub struct RefinementStage {
    output: StateKey,
    inputs: Vec<StateKey>,
    task: Arc<dyn PassTask>,
    chains: Option<usize>,
    passes: Option<usize>,
}

impl fmt::Debug for RefinementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefinementStage")
            .field("output", &self.output)
            .field("inputs", &self.inputs)
            .field("chains", &self.chains)
            .field("passes", &self.passes)
            .finish_non_exhaustive()
    }
}

struct ChainResult {
    id: String,
    findings: Vec<Finding>,
    failure: Option<FailureRecord>,
}

impl RefinementStage {
    /// Create; shape defaults to the `refinement` config section
    #[must_use]
    pub fn new(output: StateKey, task: Arc<dyn PassTask>) -> Self {
        Self {
            output,
            inputs: Vec::new(),
            task,
            chains: None,
            passes: None,
        }
    }

    /// Add an input key
    #[inline]
    #[must_use]
    pub fn reads(mut self, key: StateKey) -> Self {
        self.inputs.push(key);
        self
    }

    /// Override the chain count
    #[inline]
    #[must_use]
    pub fn with_chains(mut self, chains: usize) -> Self {
        self.chains = Some(chains);
        self
    }

    /// Override the pass count
    #[inline]
    #[must_use]
    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = Some(passes);
        self
    }

    async fn run_chain(&self, ctx: &RunContext, chain: usize, passes: usize, context: &str) -> Result<ChainResult, StageError> {
        let id = format!("chain-{chain}");
        let subject = self.output.for_item(id.clone()).to_string();
        let mut accumulated: Vec<Finding> = Vec::new();

        for pass in 0..passes {
            let input = PassInput {
                chain,
                pass,
                context,
                previous: &accumulated,
            };
            match self.task.run_pass(ctx, input).await {
                Ok(findings) => {
                    ctx.audit()
                        .append(AuditKind::Pass, &subject, serde_json::to_string(&findings).unwrap_or_default());
                    debug!(key = %subject, pass, findings = findings.len(), "refinement pass complete");
                    accumulated = findings;
                }
                Err(e) if e.is_contract_violation() => return Err(StageError::Task(e)),
                Err(e) => {
                    warn!(key = %subject, pass, error = %e, "refinement chain stopped");
                    ctx.audit()
                        .append(AuditKind::ChainFailed, &subject, format!("pass {pass}: {e}"));
                    let attempts = e.attempts();
                    return Ok(ChainResult {
                        failure: Some(FailureRecord {
                            item_id: id.clone(),
                            error: e.to_string(),
                            attempts,
                        }),
                        id,
                        findings: accumulated,
                    });
                }
            }
        }

        Ok(ChainResult {
            id,
            findings: accumulated,
            failure: None,
        })
    }
}

#[async_trait]
impl Stage for RefinementStage {
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
        let chains = self.chains.unwrap_or(ctx.config().refinement.chains).max(1);
        let requested = self.passes.unwrap_or(ctx.config().refinement.passes).max(1);
        let passes = requested.min(MAX_PASSES);
        if passes < requested {
            warn!(key = %self.output, requested, capped = passes, "pass count capped");
        }

        let aggregate = ctx.store().claim(&self.output)?;
        let handles = (0..chains)
            .map(|c| ctx.store().claim(&self.output.for_item(format!("chain-{c}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let context = gather_context(ctx, &self.inputs)?;

        let results = join_all((0..chains).map(|c| self.run_chain(ctx, c, passes, &context)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcomes = Vec::with_capacity(results.len());
        for (result, handle) in results.into_iter().zip(handles) {
            let output = FindingSet::new(result.findings);
            handle.write(StateValue::Findings(output.clone()))?;
            outcomes.push(WorkerOutcome {
                id: result.id,
                output,
                failure: result.failure,
            });
        }

        let merged = merge_outcomes(outcomes, ctx.dedup());
        let findings_count = merged.findings.len();
        aggregate.write(StateValue::Aggregate(merged))?;
        Ok(StageOutput { findings_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::testing::{context, Scripted};
    use parking_lot::Mutex;
    use vouch_state::Severity;

    /// Each pass appends one finding to what it inherited
    #[derive(Default)]
    struct Appender {
        seen: Mutex<Vec<(usize, usize, usize)>>,
        fail_chain_at: Option<(usize, usize)>,
    }

    #[async_trait]
    impl PassTask for Appender {
        async fn run_pass(&self, _ctx: &RunContext, input: PassInput<'_>) -> Result<Vec<Finding>, TaskError> {
            self.seen.lock().push((input.chain, input.pass, input.previous.len()));
            if self.fail_chain_at == Some((input.chain, input.pass)) {
                return Err(TaskError::Failed {
                    attempts: 2,
                    last_error: ProviderError::Unavailable("down".into()),
                });
            }
            let mut out = input.previous.to_vec();
            out.push(
                Finding::new(Severity::Warning, format!("pass {} finding", input.pass), "")
                    .with_subject("going concern"),
            );
            Ok(out)
        }
    }

    #[tokio::test]
    async fn each_pass_sees_only_its_own_chain() {
        let ctx = context(Arc::new(Scripted::new()));
        let task = Arc::new(Appender::default());
        let key = StateKey::new("logic", "detector");

        let output = RefinementStage::new(key.clone(), task.clone())
            .with_chains(3)
            .with_passes(3)
            .run(&ctx)
            .await
            .unwrap();

        let mut seen = task.seen.lock().clone();
        seen.sort_unstable();
        let expected: Vec<_> = (0..3).flat_map(|c| (0..3).map(move |p| (c, p, p))).collect();
        assert_eq!(seen, expected);

        // identical chains collapse under dedup
        assert_eq!(output.findings_count, 3);
        assert_eq!(ctx.audit().len(), 9);
        assert!(ctx.audit().verify_integrity().is_ok());
        assert_eq!(ctx.store().list_prefix(&key).len(), 3);
    }

    #[tokio::test]
    async fn failed_chain_keeps_last_good_output() {
        let ctx = context(Arc::new(Scripted::new()));
        let task = Arc::new(Appender {
            fail_chain_at: Some((1, 2)),
            ..Appender::default()
        });
        let key = StateKey::new("logic", "detector");

        RefinementStage::new(key.clone(), task)
            .with_chains(2)
            .with_passes(3)
            .run(&ctx)
            .await
            .unwrap();

        let chain1 = ctx.store().get(&key.for_item("chain-1")).unwrap();
        assert_eq!(chain1.findings().len(), 2);

        let StateValue::Aggregate(agg) = ctx.store().get(&key).unwrap() else {
            panic!("expected aggregate");
        };
        assert_eq!((agg.total, agg.failed), (2, 1));
        assert_eq!(agg.failures[0].item_id, "chain-1");
        assert_eq!(agg.findings.len(), 3);

        let failed = ctx
            .audit()
            .entries()
            .into_iter()
            .filter(|e| e.kind == AuditKind::ChainFailed)
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn passes_are_capped() {
        let ctx = context(Arc::new(Scripted::new()));
        let task = Arc::new(Appender::default());

        RefinementStage::new(StateKey::new("logic", "detector"), task.clone())
            .with_chains(1)
            .with_passes(MAX_PASSES + 5)
            .run(&ctx)
            .await
            .unwrap();

        assert_eq!(task.seen.lock().len(), MAX_PASSES);
    }

    #[tokio::test]
    async fn reasoning_pass_carries_previous_findings() {
        let provider = Arc::new(Scripted::new().respond("logic.detector", |prompt| {
            let inherited = prompt.context.contains("previous pass");
            let summary = if inherited { "refined" } else { "initial" };
            Ok(serde_json::json!({
                "findings": [{ "severity": "warning", "summary": summary, "detail": "" }]
            }))
        }));
        let ctx = context(provider.clone());
        let key = StateKey::new("logic", "detector");
        let task = ReasoningPassTask::findings(&key, "Find contradictions.").unwrap();

        RefinementStage::new(key.clone(), Arc::new(task))
            .with_chains(1)
            .with_passes(2)
            .run(&ctx)
            .await
            .unwrap();

        let final_output = ctx.store().get(&key).unwrap();
        assert_eq!(final_output.findings()[0].summary, "refined");
        assert_eq!(provider.calls("logic.detector"), 2);
    }
}
