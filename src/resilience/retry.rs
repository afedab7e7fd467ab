//! Retry policy.
//!
//! Retries are decided per attempt: only failures whose [`FailureKind`] is
//! retryable get another attempt, and only while the retry budget lasts.
//!
//! [`FailureKind`]: crate::failure::FailureKind

use crate::config::{BackoffType, RetryOptions};
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub struct RetryExecutor {
    scope: String,
    cfg: RetryOptions,
}

impl RetryExecutor {
    pub fn new(scope: impl Into<String>, cfg: RetryOptions) -> Self {
        Self {
            scope: scope.into(),
            cfg,
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let factor = match self.cfg.backoff_type {
            BackoffType::Constant => 1,
            BackoffType::Linear => retry,
            BackoffType::Exponential => match 2u32.checked_pow(retry - 1) {
                Some(f) => f,
                None => return Duration::MAX,
            },
        };
        self.cfg.delay.checked_mul(factor).unwrap_or(Duration::MAX)
    }

    /// Backoff before retry number `retry`, with jitter in [0.5x, 1.5x) when enabled.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.cfg.use_jitter && !base.is_zero() {
            let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
            Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
        } else {
            base
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry budget is spent.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_counted(operation).await.0
    }

    /// Like [`run`](Self::run), also returning the number of attempts made.
    pub async fn run_counted<T, F, Fut>(&self, mut operation: F) -> (Result<T>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.cfg.enabled {
            return (operation(1).await, 1);
        }

        let mut attempt: u32 = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            scope = self.scope.as_str(),
                            attempt, "operation succeeded after retry"
                        );
                    }
                    return (Ok(value), attempt);
                }
                Err(e) if !e.is_retryable() => return (Err(e), attempt),
                Err(e) => {
                    let retries_done = attempt - 1;
                    if retries_done >= self.cfg.max_retry_attempts {
                        let last_kind = e
                            .failure_kind()
                            .unwrap_or(crate::failure::FailureKind::Network);
                        return (
                            Err(Error::RetriesExhausted {
                                scope: self.scope.clone(),
                                attempts: attempt,
                                last_kind,
                                last: Box::new(e),
                            }),
                            attempt,
                        );
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        scope = self.scope.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
