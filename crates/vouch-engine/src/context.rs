//! Shared run context

use crate::audit::AuditTrail;
use crate::config::EngineConfig;
use crate::pool::ProviderPool;
use crate::progress::{NoopSink, ProgressSink};
use std::fmt;
use std::sync::Arc;
use vouch_state::{DedupRule, StateStore, SubjectConclusionRule};

/// Everything a stage needs while it runs
///
/// Cloning is cheap. [`RunContext::for_vertical`] derives the context a
/// single vertical runs under; the store, pool and audit trail stay shared.
#[derive(Clone)]
pub struct RunContext {
    store: StateStore,
    pool: Arc<ProviderPool>,
    config: Arc<EngineConfig>,
    progress: Arc<dyn ProgressSink>,
    audit: Arc<AuditTrail>,
    dedup: Arc<dyn DedupRule>,
    vertical: String,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("vertical", &self.vertical)
            .field("entries", &self.store.len())
            .field("pool", &self.pool)
            .field("dedup", &self.dedup)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Create a context with a silent progress sink and the default dedup rule
    #[must_use]
    pub fn new(store: StateStore, pool: Arc<ProviderPool>, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            pool,
            config,
            progress: Arc::new(NoopSink),
            audit: Arc::new(AuditTrail::new()),
            dedup: Arc::new(SubjectConclusionRule),
            vertical: String::new(),
        }
    }

    /// With progress sink
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// With audit trail
    #[inline]
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = audit;
        self
    }

    /// With dedup rule
    #[inline]
    #[must_use]
    pub fn with_dedup_rule(mut self, dedup: Arc<dyn DedupRule>) -> Self {
        self.dedup = dedup;
        self
    }

    /// Context for one vertical
    #[must_use]
    pub fn for_vertical(&self, vertical: impl Into<String>) -> Self {
        Self {
            vertical: vertical.into(),
            ..self.clone()
        }
    }

    /// State store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Provider pool
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &ProviderPool {
        &self.pool
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Progress sink
    #[inline]
    #[must_use]
    pub fn progress(&self) -> &dyn ProgressSink {
        self.progress.as_ref()
    }

    /// Audit trail
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Dedup rule used by aggregators
    #[inline]
    #[must_use]
    pub fn dedup(&self) -> &dyn DedupRule {
        self.dedup.as_ref()
    }

    /// Vertical this context runs under, empty at the root
    #[inline]
    #[must_use]
    pub fn vertical(&self) -> &str {
        &self.vertical
    }
}
