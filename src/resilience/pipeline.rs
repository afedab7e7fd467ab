use crate::config::ResilienceOptions;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterSnapshot};
use crate::resilience::retry::RetryExecutor;
use crate::resilience::timeout::TimeoutGuard;
use crate::telemetry::MetricsCollector;
use crate::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Scope name of the pipeline every un-named call goes through.
pub const GLOBAL_SCOPE: &str = "global";

/// A facts-only view of a pipeline's policy state.
#[derive(Debug, Clone)]
pub struct PipelineSignals {
    pub scope: String,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub rate_limiter: RateLimiterSnapshot,
}

/// One composed resilience path, bound to a single options snapshot.
///
/// Layers, outermost first:
///
/// ```text
/// RateLimiter -> CircuitBreaker -> RetryExecutor -> TimeoutGuard -> operation
/// ```
///
/// The breaker sees one outcome per call no matter how many attempts the
/// retry layer makes; every attempt gets its own deadline.
pub struct Pipeline {
    scope: String,
    options: Arc<ResilienceOptions>,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
    timeout: TimeoutGuard,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline. `shutdown` is the owner's disposal token; once it is
    /// cancelled every call fails with [`Error::Disposed`].
    pub fn new(
        scope: impl Into<String>,
        options: Arc<ResilienceOptions>,
        metrics: Arc<MetricsCollector>,
        shutdown: CancellationToken,
    ) -> Self {
        let scope = scope.into();
        let master = options.enabled;

        let mut rate_limiting = options.rate_limiting.clone();
        rate_limiting.enabled &= master;
        let mut circuit_breaker = options.circuit_breaker.clone();
        circuit_breaker.enabled &= master;
        let mut retry = options.retry.clone();
        retry.enabled &= master;
        let mut timeout = options.timeout.clone();
        timeout.enabled &= master;

        Self {
            rate_limiter: RateLimiter::new(scope.clone(), rate_limiting),
            breaker: CircuitBreaker::new(scope.clone(), circuit_breaker),
            retry: RetryExecutor::new(scope.clone(), retry),
            timeout: TimeoutGuard::new(scope.clone(), timeout),
            scope,
            options,
            metrics,
            shutdown,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn options(&self) -> &ResilienceOptions {
        &self.options
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run `operation` through every layer.
    ///
    /// `operation` may be invoked several times (once per attempt); each call
    /// receives a fresh cancellation token that fires on timeout or disposal.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let op = &operation;
        let attempts_ref = &attempts;
        let breaker = &self.breaker;
        let retry = &self.retry;
        let timeout = &self.timeout;
        let shutdown = &self.shutdown;

        let result = self
            .rate_limiter
            .run(move || async move {
                // a queued caller may be released after disposal
                if shutdown.is_cancelled() {
                    return Err(Error::Disposed);
                }
                let guarded = breaker.guard(move || {
                    retry.run(move |attempt| async move {
                        attempts_ref.store(attempt, Ordering::Relaxed);
                        let result = timeout.bound(shutdown, move |token| op(token)).await;
                        // an attempt cut short by disposal says nothing about the dependency
                        if shutdown.is_cancelled() {
                            Err(Error::Disposed)
                        } else {
                            result
                        }
                    })
                });
                // disposal also ends any backoff sleep in progress
                let result = tokio::select! {
                    biased;
                    result = guarded => result,
                    _ = shutdown.cancelled() => Err(Error::Disposed),
                };
                if shutdown.is_cancelled() {
                    Err(Error::Disposed)
                } else {
                    result
                }
            })
            .await;

        self.record(&result, started.elapsed(), attempts.load(Ordering::Relaxed));
        result
    }

    fn record<T>(&self, result: &Result<T>, latency: Duration, attempts: u32) {
        if matches!(result, Err(Error::Disposed)) {
            return;
        }
        self.metrics
            .record_outcome(&self.scope, result.is_ok(), latency);
        if attempts > 1 {
            self.metrics
                .record(&format!("{}.retries", self.scope), (attempts - 1) as f64);
        }
        if let Err(e) = result {
            let layer = e.terminating_layer();
            self.metrics
                .increment(&format!("{}.errors.{}", self.scope, layer.name()));
            debug!(
                scope = self.scope.as_str(),
                layer = layer.name(),
                attempts,
                latency_ms = latency.as_millis() as u64,
                error = %e,
                "pipeline call failed"
            );
        }
    }

    pub fn signals(&self) -> PipelineSignals {
        PipelineSignals {
            scope: self.scope.clone(),
            circuit_breaker: self.breaker.snapshot(),
            rate_limiter: self.rate_limiter.snapshot(),
        }
    }

    /// Release queued callers and refuse new permits.
    pub(crate) fn close(&self) {
        self.rate_limiter.close();
    }
}
