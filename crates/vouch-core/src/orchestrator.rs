//! Root orchestrator
//!
//! # Workflow
//! 1. Seed the document into a fresh state store
//! 2. Run the gate; a rejection ends the run before any vertical starts
//! 3. Launch every vertical concurrently with the gate's [`ProceedToken`]
//! 4. Join them; a state contract violation aborts the rest and fails the run
//! 5. Emit `run_complete`, hand the result to persistence

use crate::error::RunError;
use crate::persistence::RunPersistence;
use crate::result::{RunResult, RunStatus, VerticalResult, VerticalStatus};
use crate::seed::{tables_key, text_key, DocumentSeed};
use crate::verticals;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use ulid::Ulid;
use vouch_engine::{
    EngineConfig, GateDecision, GateStage, NoopSink, Pipeline, PoolStats, ProceedToken, ProgressEvent, ProgressSink,
    ProviderPool, ReasoningProvider, RunContext,
};
use vouch_state::{DedupRule, StateStore};

const CLASSIFIER_INSTRUCTIONS: &str = "Decide whether this document is a financial report \
(annual report, financial statements, interim report, audit report) that can be analysed \
for numeric consistency and disclosure compliance. Answer relevant=false only when you are \
confident it is not.";

/// Runs the gate, then every vertical
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    pool: Arc<ProviderPool>,
    gate: GateStage,
    verticals: Vec<Arc<Pipeline>>,
    progress: Arc<dyn ProgressSink>,
    persistence: Option<Arc<dyn RunPersistence>>,
    dedup: Option<Arc<dyn DedupRule>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.verticals.iter().map(|v| v.name()).collect();
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .field("verticals", &names)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator with the standard verticals and a classifier gate
    ///
    /// # Errors
    /// `RunError::Config` when `config` fails validation.
    pub fn new(provider: Arc<dyn ReasoningProvider>, config: EngineConfig) -> Result<Self, RunError> {
        config.validate()?;
        let pool = ProviderPool::from_config(provider, &config.provider);
        Ok(Self {
            config: Arc::new(config),
            pool: Arc::new(pool),
            gate: GateStage::new(text_key(), tables_key()).with_classifier(CLASSIFIER_INSTRUCTIONS)?,
            verticals: verticals::standard()?.into_iter().map(Arc::new).collect(),
            progress: Arc::new(NoopSink),
            persistence: None,
            dedup: None,
        })
    }

    /// Replace the verticals
    ///
    /// # Errors
    /// `RunError::DuplicateVertical` when two pipelines share a name.
    pub fn with_verticals(mut self, pipelines: Vec<Pipeline>) -> Result<Self, RunError> {
        let mut seen = HashSet::new();
        for pipeline in &pipelines {
            if !seen.insert(pipeline.name().to_string()) {
                return Err(RunError::DuplicateVertical(pipeline.name().to_string()));
            }
        }
        self.verticals = pipelines.into_iter().map(Arc::new).collect();
        Ok(self)
    }

    /// Gate on preflight only
    #[must_use]
    pub fn without_classifier(mut self) -> Self {
        self.gate = GateStage::new(text_key(), tables_key());
        self
    }

    /// Progress sink
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Persistence collaborator
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn RunPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Dedup rule used by every aggregator
    #[must_use]
    pub fn with_dedup_rule(mut self, rule: Arc<dyn DedupRule>) -> Self {
        self.dedup = Some(rule);
        self
    }

    /// Provider pool statistics, cumulative across runs
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Analyse one document
    ///
    /// Rejected, complete and failed runs are all `Ok`; see
    /// [`RunResult::status`].
    ///
    /// # Errors
    /// `RunError::Seed` if the seed cannot be written.
    pub async fn run(&self, seed: &DocumentSeed) -> Result<RunResult, RunError> {
        let run_id = Ulid::new();
        let started_at = Utc::now();
        info!(run_id = %run_id, verticals = self.verticals.len(), "run started");

        let mut ctx = RunContext::new(StateStore::new(), Arc::clone(&self.pool), Arc::clone(&self.config))
            .with_progress(Arc::clone(&self.progress));
        if let Some(rule) = &self.dedup {
            ctx = ctx.with_dedup_rule(Arc::clone(rule));
        }
        seed.seed_into(ctx.store())?;

        let mut verticals: IndexMap<String, VerticalResult> = self
            .verticals
            .iter()
            .map(|v| (v.name().to_string(), VerticalResult::default()))
            .collect();
        let mut rejection = None;
        let mut acceptance = None;

        let status = match self.gate.evaluate(&ctx.for_vertical("gate")).await {
            Ok(GateDecision::Rejected(r)) => {
                info!(run_id = %run_id, check = ?r.check, reason = %r.reason, "document rejected by gate");
                rejection = Some(r);
                RunStatus::Rejected
            }
            Ok(GateDecision::Proceed(token)) => {
                acceptance = Some(token.acceptance().clone());
                self.launch(token, &ctx, &mut verticals).await
            }
            Err(e) => {
                // the gate reads only the seeded keys, so this is a state fault
                error!(run_id = %run_id, error = %e, "gate failed");
                RunStatus::Failed
            }
        };

        let result = RunResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
            rejection,
            acceptance,
            verticals,
            audit: ctx.audit().entries(),
        };
        if let Err(e) = ctx.audit().verify_integrity() {
            error!(run_id = %run_id, error = %e, "audit trail corrupted");
        }
        info!(run_id = %run_id, status = %result.status, "run finished");
        debug!(stats = ?self.pool.stats(), "provider pool");

        self.progress.emit(ProgressEvent::RunComplete {
            run_id: run_id.to_string(),
            status: result.status.to_string(),
        });
        self.persist(&result, ctx.store()).await;
        Ok(result)
    }

    /// Run every vertical; only a gate acceptance can start them
    async fn launch(
        &self,
        _token: ProceedToken,
        ctx: &RunContext,
        results: &mut IndexMap<String, VerticalResult>,
    ) -> RunStatus {
        let mut set = JoinSet::new();
        for pipeline in &self.verticals {
            let pipeline = Arc::clone(pipeline);
            let vctx = ctx.for_vertical(pipeline.name());
            if let Some(slot) = results.get_mut(pipeline.name()) {
                slot.status = VerticalStatus::Running;
            }
            set.spawn(async move {
                let outcome = pipeline.run(&vctx).await;
                (pipeline.name().to_string(), outcome)
            });
        }

        let mut violated = false;
        while let Some(joined) = set.join_next().await {
            let (name, outcome) = match joined {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    error!(error = %e, "vertical task panicked");
                    continue;
                }
            };

            let result = match outcome {
                Ok(report) => {
                    let terminal = ctx.store().get(&report.terminal);
                    let result = VerticalResult::complete(terminal.as_ref());
                    info!(
                        vertical = %name,
                        findings = result.findings.len(),
                        failed = result.failed(),
                        "vertical complete"
                    );
                    result
                }
                Err(e) => {
                    if e.is_contract_violation() {
                        error!(vertical = %name, error = %e, "state contract violated, aborting run");
                        violated = true;
                        set.abort_all();
                    } else {
                        warn!(vertical = %name, error = %e, "vertical failed");
                    }
                    self.progress.emit(ProgressEvent::VerticalError {
                        vertical: name.clone(),
                        message: e.to_string(),
                    });
                    VerticalResult::error(e.to_string())
                }
            };
            results.insert(name, result);
        }

        for slot in results.values_mut() {
            if slot.status == VerticalStatus::Running {
                *slot = VerticalResult::error(if violated {
                    "aborted after a state contract violation"
                } else {
                    "vertical task did not finish"
                });
            }
        }

        if violated {
            RunStatus::Failed
        } else {
            RunStatus::Complete
        }
    }

    async fn persist(&self, result: &RunResult, store: &StateStore) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.persist(result, &store.snapshot()).await {
            warn!(run_id = %result.run_id, error = %e, "run persistence failed");
        }
    }
}
