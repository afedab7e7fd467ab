use crate::config::TimeoutOptions;
use crate::{Error, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Bounds the duration of a single attempt.
///
/// The operation receives a [`CancellationToken`] that fires when the deadline
/// passes (or when the parent token is cancelled); the attempt future is then
/// dropped and its late result discarded.
pub struct TimeoutGuard {
    scope: String,
    cfg: TimeoutOptions,
}

impl TimeoutGuard {
    pub fn new(scope: impl Into<String>, cfg: TimeoutOptions) -> Self {
        Self {
            scope: scope.into(),
            cfg,
        }
    }

    /// Run `operation` with a child of `parent` as its cancellation token.
    pub async fn bound<T, F, Fut>(&self, parent: &CancellationToken, operation: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = parent.child_token();
        if !self.cfg.enabled {
            return operation(token).await;
        }

        let attempt = operation(token.clone());
        tokio::select! {
            biased;
            result = attempt => result,
            _ = tokio::time::sleep(self.cfg.timeout) => {
                token.cancel();
                warn!(
                    scope = self.scope.as_str(),
                    timeout_ms = self.cfg.timeout.as_millis() as u64,
                    "attempt timed out"
                );
                Err(Error::Timeout {
                    scope: self.scope.clone(),
                    timeout: self.cfg.timeout,
                })
            }
        }
    }
}
