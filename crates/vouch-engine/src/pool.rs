//! Global worker pool for provider calls
//!
//! Every reasoning call in a run goes through one [`ProviderPool`]. The
//! semaphore is the run's only throttle against provider rate limits: when
//! it is saturated, callers queue instead of spawning more calls.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::provider::{Prompt, ReasoningProvider};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Calls started
    pub started: usize,
    /// Calls that returned a value
    pub completed: usize,
    /// Calls that returned an error (timeouts included)
    pub failed: usize,
    /// Calls cut off by the timeout
    pub timed_out: usize,
    /// Calls currently in flight
    pub in_flight: usize,
    /// Highest observed `in_flight`
    pub peak_concurrency: usize,
}

/// Bounded, timed access to the reasoning provider
pub struct ProviderPool {
    provider: Arc<dyn ReasoningProvider>,
    permits: Semaphore,
    max_concurrent: usize,
    call_timeout: Duration,
    stats: Mutex<PoolStats>,
}

impl fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderPool")
            .field("max_concurrent", &self.max_concurrent)
            .field("call_timeout", &self.call_timeout)
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

impl ProviderPool {
    /// Create a pool
    #[must_use]
    pub fn new(provider: Arc<dyn ReasoningProvider>, max_concurrent: usize, call_timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            provider,
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
            call_timeout,
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Create a pool from configuration
    #[must_use]
    pub fn from_config(provider: Arc<dyn ReasoningProvider>, config: &ProviderConfig) -> Self {
        Self::new(provider, config.max_concurrent_calls, config.call_timeout())
    }

    /// Concurrency bound
    #[inline]
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Snapshot of the statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }

    /// Make one provider call under the pool bound and the per-call timeout
    ///
    /// A call that times out is abandoned, not cancelled on the provider
    /// side; its late result is discarded.
    ///
    /// # Errors
    /// The provider's error, or `ProviderError::Timeout`.
    pub async fn call(&self, prompt: &Prompt, schema: &Value) -> Result<Value, ProviderError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProviderError::Unavailable("provider pool closed".to_string()))?;

        {
            let mut stats = self.stats.lock();
            stats.started += 1;
            stats.in_flight += 1;
            stats.peak_concurrency = stats.peak_concurrency.max(stats.in_flight);
        }

        let outcome = match tokio::time::timeout(self.call_timeout, self.provider.invoke(prompt, schema)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.call_timeout)),
        };

        let mut stats = self.stats.lock();
        stats.in_flight -= 1;
        match &outcome {
            Ok(_) => stats.completed += 1,
            Err(ProviderError::Timeout(_)) => {
                stats.failed += 1;
                stats.timed_out += 1;
            }
            Err(_) => stats.failed += 1,
        }
        drop(stats);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct SlowEcho {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningProvider for SlowEcho {
        async fn invoke(&self, prompt: &Prompt, _schema: &Value) -> Result<Value, ProviderError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if prompt.task == "hang" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Value::String(prompt.context.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let provider = Arc::new(SlowEcho::default());
        let pool = ProviderPool::new(provider.clone(), 3, Duration::from_secs(10));

        let prompts: Vec<Prompt> = (0..10).map(|i| Prompt::new("echo", "", i.to_string())).collect();
        let results = join_all(prompts.iter().map(|p| pool.call(p, &Value::Null))).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(provider.peak.load(Ordering::SeqCst) <= 3);

        let stats = pool.stats();
        assert_eq!(stats.started, 10);
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.peak_concurrency, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let pool = ProviderPool::new(Arc::new(SlowEcho::default()), 1, Duration::from_secs(1));
        let err = pool.call(&Prompt::new("hang", "", ""), &Value::Null).await.unwrap_err();

        assert_eq!(err, ProviderError::Timeout(Duration::from_secs(1)));
        let stats = pool.stats();
        assert_eq!((stats.failed, stats.timed_out), (1, 1));
    }
}
