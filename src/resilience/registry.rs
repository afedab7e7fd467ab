//! Pipeline registry: owns every pipeline, the shared metrics, and the live
//! option set.
//!
//! Pipelines are cached per scope. The `"global"` scope is always available
//! and uses the registry's current default options; endpoint scopes use either
//! an explicit override or the same defaults.

use crate::config::ResilienceOptions;
use crate::error::ErrorContext;
use crate::resilience::pipeline::{Pipeline, PipelineSignals, GLOBAL_SCOPE};
use crate::telemetry::{MetricsCollector, MetricsSnapshot};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type PipelineMap = HashMap<String, Arc<Pipeline>>;
type OverrideMap = HashMap<String, Arc<ResilienceOptions>>;

pub struct PipelineRegistry {
    options: ArcSwap<ResilienceOptions>,
    // lock order: overrides before pipelines
    overrides: RwLock<OverrideMap>,
    pipelines: RwLock<PipelineMap>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl PipelineRegistry {
    /// Create a registry with `options` as the default set.
    ///
    /// Fails with a configuration error when the options are inconsistent.
    pub fn new(options: ResilienceOptions) -> Result<Self> {
        options.validate()?;
        let registry = Self {
            options: ArcSwap::from_pointee(options),
            overrides: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
            metrics: Arc::new(MetricsCollector::new()),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        };
        registry.global()?;
        Ok(registry)
    }

    fn read_pipelines(&self) -> RwLockReadGuard<'_, PipelineMap> {
        self.pipelines.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_pipelines(&self) -> RwLockWriteGuard<'_, PipelineMap> {
        self.pipelines.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_overrides(&self) -> RwLockReadGuard<'_, OverrideMap> {
        self.overrides.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_overrides(&self) -> RwLockWriteGuard<'_, OverrideMap> {
        self.overrides.write().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Current default options.
    pub fn options(&self) -> Arc<ResilienceOptions> {
        self.options.load_full()
    }

    /// Options an endpoint pipeline would be built with right now.
    pub fn endpoint_options(&self, name: &str) -> Arc<ResilienceOptions> {
        self.read_overrides()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.options.load_full())
    }

    fn build(&self, scope: &str, options: Arc<ResilienceOptions>) -> Arc<Pipeline> {
        debug!(scope, enabled = options.enabled, "building resilience pipeline");
        Arc::new(Pipeline::new(
            scope,
            options,
            Arc::clone(&self.metrics),
            self.shutdown.clone(),
        ))
    }

    /// Cached pipeline for `scope` when built from equal options, otherwise a
    /// replacement. Callers hold the cache write lock.
    fn insert_locked(
        &self,
        pipelines: &mut PipelineMap,
        scope: &str,
        options: Arc<ResilienceOptions>,
    ) -> Result<Arc<Pipeline>> {
        // another caller may have built it while we waited for the lock
        if let Some(p) = pipelines.get(scope) {
            if p.options() == &*options {
                return Ok(Arc::clone(p));
            }
        }
        self.ensure_active()?;
        let pipeline = self.build(scope, options);
        pipelines.insert(scope.to_string(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// The cached pipeline for `scope` if it was built from equal options;
    /// otherwise a new pipeline that replaces it.
    ///
    /// The `"global"` scope only accepts the current default options; change
    /// those with [`update_configuration`](Self::update_configuration).
    pub fn get_or_create(&self, scope: &str, options: &ResilienceOptions) -> Result<Arc<Pipeline>> {
        self.ensure_active()?;
        validate_scope(scope)?;
        if scope == GLOBAL_SCOPE && **self.options.load() != *options {
            return Err(Error::validation_with_context(
                "the global pipeline follows the default options; use update_configuration",
                ErrorContext::new()
                    .with_field_path("scope")
                    .with_source("pipeline_registry"),
            ));
        }
        if let Some(p) = self.read_pipelines().get(scope) {
            if p.options() == options {
                return Ok(Arc::clone(p));
            }
        }

        options.validate()?;
        let mut pipelines = self.write_pipelines();
        self.insert_locked(&mut pipelines, scope, Arc::new(options.clone()))
    }

    /// The pipeline serving un-named calls.
    pub fn global(&self) -> Result<Arc<Pipeline>> {
        self.ensure_active()?;
        {
            let current = self.options.load();
            if let Some(p) = self.read_pipelines().get(GLOBAL_SCOPE) {
                if p.options() == &**current {
                    return Ok(Arc::clone(p));
                }
            }
        }
        let mut pipelines = self.write_pipelines();
        // read under the lock so a concurrent update evicts what we insert
        let options = self.options.load_full();
        self.insert_locked(&mut pipelines, GLOBAL_SCOPE, options)
    }

    /// Build (or fetch) the pipeline for endpoint `name`.
    ///
    /// `Some(options)` records an override that survives
    /// [`update_configuration`](Self::update_configuration) and
    /// [`reset`](Self::reset); `None` keeps whatever the endpoint uses now.
    pub fn create_endpoint_pipeline(
        &self,
        name: &str,
        options: Option<ResilienceOptions>,
    ) -> Result<Arc<Pipeline>> {
        self.ensure_active()?;
        validate_scope(name)?;
        if name == GLOBAL_SCOPE {
            return Err(Error::validation_with_context(
                format!("endpoint name '{}' is reserved", GLOBAL_SCOPE),
                ErrorContext::new()
                    .with_field_path("endpoint")
                    .with_source("pipeline_registry"),
            ));
        }
        match options {
            Some(options) => {
                options.validate()?;
                let options = Arc::new(options);
                let mut overrides = self.write_overrides();
                let mut pipelines = self.write_pipelines();
                overrides.insert(name.to_string(), Arc::clone(&options));
                self.insert_locked(&mut pipelines, name, options)
            }
            None => self.endpoint(name),
        }
    }

    /// The cached pipeline for endpoint `name`, built on first use.
    pub fn endpoint(&self, name: &str) -> Result<Arc<Pipeline>> {
        self.ensure_active()?;
        validate_scope(name)?;
        if let Some(p) = self.read_pipelines().get(name) {
            return Ok(Arc::clone(p));
        }

        let overrides = self.read_overrides();
        let mut pipelines = self.write_pipelines();
        if let Some(p) = pipelines.get(name) {
            return Ok(Arc::clone(p));
        }
        // resolved under the cache lock: an update_configuration racing with
        // us either lands first or evicts this pipeline right after
        let options = overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.options.load_full());
        self.insert_locked(&mut pipelines, name, options)
    }

    /// Run `operation` through the global pipeline.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.global()?.execute(operation).await
    }

    /// Run `operation` through the pipeline of endpoint `name`.
    pub async fn execute_endpoint<T, F, Fut>(&self, name: &str, operation: F) -> Result<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.endpoint(name)?.execute(operation).await
    }

    /// Replace the default options.
    ///
    /// The global pipeline and every endpoint without an override are
    /// dropped from the cache; calls already running finish on the pipeline
    /// they started with.
    pub fn update_configuration(&self, options: ResilienceOptions) -> Result<()> {
        self.ensure_active()?;
        options.validate()?;
        self.options.store(Arc::new(options));

        let overrides = self.read_overrides();
        let mut pipelines = self.write_pipelines();
        let before = pipelines.len();
        pipelines.retain(|scope, _| overrides.contains_key(scope));
        info!(
            invalidated = before - pipelines.len(),
            "resilience configuration updated"
        );
        Ok(())
    }

    /// Drop every cached pipeline and all recorded metrics.
    ///
    /// Endpoint overrides are kept; breaker and limiter state starts fresh.
    pub fn reset(&self) -> Result<()> {
        self.ensure_active()?;
        let dropped = {
            let mut pipelines = self.write_pipelines();
            let n = pipelines.len();
            pipelines.clear();
            n
        };
        self.metrics.clear();
        info!(dropped, "resilience pipelines reset");
        Ok(())
    }

    /// Cancel in-flight work and refuse every later call. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let pipelines: Vec<_> = self.write_pipelines().drain().map(|(_, p)| p).collect();
        for p in &pipelines {
            p.close();
        }
        info!(pipelines = pipelines.len(), "pipeline registry disposed");
    }

    pub fn metrics(&self) -> Result<MetricsSnapshot> {
        self.ensure_active()?;
        Ok(self.metrics.snapshot())
    }

    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Signals of every cached pipeline, sorted by scope.
    pub fn signals(&self) -> Result<Vec<PipelineSignals>> {
        self.ensure_active()?;
        let mut out: Vec<_> = self.read_pipelines().values().map(|p| p.signals()).collect();
        out.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(out)
    }

    /// Scopes that currently have a cached pipeline.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<_> = self.read_pipelines().keys().cloned().collect();
        scopes.sort();
        scopes
    }
}

impl Drop for PipelineRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("scopes", &self.scopes())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn validate_scope(scope: &str) -> Result<()> {
    if scope.trim().is_empty() {
        return Err(Error::validation_with_context(
            "pipeline scope must not be empty",
            ErrorContext::new()
                .with_field_path("endpoint")
                .with_source("pipeline_registry"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryOptions;
    use crate::failure::FailureKind;
    use std::time::Duration;

    fn registry() -> PipelineRegistry {
        PipelineRegistry::new(ResilienceOptions::default()).unwrap()
    }

    #[test]
    fn test_global_is_built_eagerly_and_cached() {
        let reg = registry();
        assert_eq!(reg.scopes(), vec!["global".to_string()]);
        let a = reg.global().unwrap();
        let b = reg.global().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_get_or_create_is_idempotent_for_equal_options() {
        let reg = registry();
        let options = ResilienceOptions::default();
        let a = reg.get_or_create("reviews", &options).unwrap();
        let b = reg.get_or_create("reviews", &options.clone()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let changed = options.with_retry(RetryOptions {
            max_retry_attempts: 1,
            ..RetryOptions::default()
        });
        let c = reg.get_or_create("reviews", &changed).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.options().retry.max_retry_attempts, 1);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let mut options = ResilienceOptions::default();
        options.circuit_breaker.failure_ratio = 1.5;
        assert!(matches!(
            PipelineRegistry::new(options.clone()),
            Err(Error::Configuration { .. })
        ));

        let reg = registry();
        assert!(reg.update_configuration(options.clone()).is_err());
        assert!(reg
            .create_endpoint_pipeline("reviews", Some(options))
            .is_err());
        assert_eq!(reg.options().circuit_breaker.failure_ratio, 0.5);
    }

    #[test]
    fn test_endpoint_names_are_validated() {
        let reg = registry();
        assert!(matches!(
            reg.create_endpoint_pipeline("", None),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            reg.create_endpoint_pipeline("  ", None),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            reg.create_endpoint_pipeline("global", Some(ResilienceOptions::default())),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_update_configuration_keeps_overridden_endpoints() {
        let reg = registry();
        let custom = ResilienceOptions::default().with_retry(RetryOptions {
            max_retry_attempts: 7,
            ..RetryOptions::default()
        });
        let pinned = reg
            .create_endpoint_pipeline("submissions", Some(custom))
            .unwrap();
        let plain = reg.create_endpoint_pipeline("reviews", None).unwrap();
        let global = reg.global().unwrap();

        reg.update_configuration(ResilienceOptions::disabled()).unwrap();

        assert!(Arc::ptr_eq(&pinned, &reg.endpoint("submissions").unwrap()));
        let rebuilt = reg.endpoint("reviews").unwrap();
        assert!(!Arc::ptr_eq(&plain, &rebuilt));
        assert!(!rebuilt.options().enabled);
        assert!(!Arc::ptr_eq(&global, &reg.global().unwrap()));
    }

    #[tokio::test]
    async fn test_reset_clears_metrics_and_pipelines() {
        let reg = registry();
        reg.execute(|_| async { Ok(()) }).await.unwrap();
        reg.execute_endpoint("reviews", |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(!reg.metrics().unwrap().is_empty());

        let before = reg.endpoint("reviews").unwrap();
        reg.reset().unwrap();
        assert!(reg.metrics().unwrap().is_empty());
        assert!(reg.scopes().is_empty());
        assert!(!Arc::ptr_eq(&before, &reg.endpoint("reviews").unwrap()));
    }

    #[tokio::test]
    async fn test_disposed_registry_refuses_everything() {
        let reg = registry();
        reg.dispose();
        reg.dispose();
        assert!(reg.is_disposed());
        assert!(matches!(reg.global(), Err(Error::Disposed)));
        assert!(matches!(reg.metrics(), Err(Error::Disposed)));
        assert!(matches!(reg.reset(), Err(Error::Disposed)));
        assert!(matches!(
            reg.update_configuration(ResilienceOptions::default()),
            Err(Error::Disposed)
        ));
        assert!(matches!(
            reg.execute(|_| async { Ok(()) }).await,
            Err(Error::Disposed)
        ));
        assert!(matches!(
            reg.execute_endpoint("reviews", |_| async { Ok(()) }).await,
            Err(Error::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_dispose_cancels_in_flight_work() {
        let reg = Arc::new(registry());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let started_tx = std::sync::Mutex::new(Some(started_tx));
        let worker = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.execute(|token| {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    async move {
                        token.cancelled().await;
                        Err::<(), _>(Error::operation(FailureKind::Cancelled, "disposed"))
                    }
                })
                .await
            })
        };
        started_rx.await.unwrap();
        reg.dispose();
        let result = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Disposed)), "{:?}", result);
    }

    #[tokio::test]
    async fn test_dispose_without_retry_reports_disposed() {
        let reg = Arc::new(
            PipelineRegistry::new(ResilienceOptions::default().with_retry(RetryOptions {
                enabled: false,
                ..RetryOptions::default()
            }))
            .unwrap(),
        );
        let started = Arc::new(tokio::sync::Notify::new());
        let worker = {
            let reg = Arc::clone(&reg);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                reg.execute(|token| {
                    let started = Arc::clone(&started);
                    async move {
                        started.notify_one();
                        token.cancelled().await;
                        Err::<(), _>(Error::operation(FailureKind::Cancelled, "x"))
                    }
                })
                .await
            })
        };
        started.notified().await;
        let global = reg.global().unwrap();
        reg.dispose();

        let result = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Disposed)), "{:?}", result);
        assert_eq!(global.signals().circuit_breaker.throughput, 0);
        assert!(reg.metrics_collector().snapshot().is_empty());
    }

    #[test]
    fn test_global_options_change_only_through_update() {
        let reg = registry();
        let global = reg.global().unwrap();
        let other = ResilienceOptions::disabled();
        assert!(matches!(
            reg.get_or_create("global", &other),
            Err(Error::Validation { .. })
        ));
        assert!(Arc::ptr_eq(&global, &reg.global().unwrap()));

        // the current defaults are still accepted
        let same = reg.get_or_create("global", &reg.options()).unwrap();
        assert!(Arc::ptr_eq(&global, &same));

        reg.update_configuration(other.clone()).unwrap();
        let rebuilt = reg.get_or_create("global", &other).unwrap();
        assert!(Arc::ptr_eq(&rebuilt, &reg.global().unwrap()));
        assert!(!rebuilt.options().enabled);
    }

    #[test]
    fn test_endpoint_after_update_uses_new_defaults() {
        let reg = registry();
        reg.update_configuration(ResilienceOptions::disabled()).unwrap();
        let reviews = reg.endpoint("reviews").unwrap();
        assert_eq!(reviews.options(), &*reg.endpoint_options("reviews"));
        assert!(!reviews.options().enabled);
    }

    #[test]
    fn test_concurrent_update_never_leaves_stale_endpoint() {
        let reg = Arc::new(registry());
        let variants = [ResilienceOptions::default(), ResilienceOptions::disabled()];
        for round in 0..200 {
            let reader = {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        reg.endpoint("reviews").unwrap();
                        reg.global().unwrap();
                    }
                })
            };
            reg.update_configuration(variants[round % 2].clone()).unwrap();
            reader.join().unwrap();

            let current = reg.options();
            assert_eq!(reg.endpoint("reviews").unwrap().options(), &*current);
            assert_eq!(reg.global().unwrap().options(), &*current);
        }
    }
}
