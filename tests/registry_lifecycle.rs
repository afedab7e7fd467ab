//! Registry caching, reconfiguration and disposal.

use manuscript_review::{
    Error, FailureKind, PipelineRegistry, RateLimitingOptions, ResilienceOptions, RetryOptions,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn tight_limiter() -> ResilienceOptions {
    ResilienceOptions::new().with_rate_limiting(RateLimitingOptions {
        enabled: true,
        permit_limit: 1,
        window: Duration::from_secs(10),
        segments_per_window: 1,
        queue_limit: 1,
    })
}

#[test]
fn test_endpoint_pipeline_is_reused() -> anyhow::Result<()> {
    let registry = PipelineRegistry::new(ResilienceOptions::default())?;
    let a = registry.create_endpoint_pipeline("reviews", None)?;
    let b = registry.create_endpoint_pipeline("reviews", None)?;
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &registry.endpoint("reviews")?));
    assert_eq!(a.scope(), "reviews");
    Ok(())
}

#[tokio::test]
async fn test_endpoints_are_isolated_from_global() {
    let registry = PipelineRegistry::new(tight_limiter()).unwrap();
    registry.execute(|_| async { Ok(()) }).await.unwrap();

    // the global permit is spent, the endpoint still has its own
    registry
        .execute_endpoint("reviews", |_| async { Ok(()) })
        .await
        .unwrap();

    let metrics = registry.metrics().unwrap();
    assert_eq!(metrics["global.requests.success"].count, 1);
    assert_eq!(metrics["reviews.requests.success"].count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_configuration_applies_to_new_calls() {
    let registry = PipelineRegistry::new(ResilienceOptions::default()).unwrap();
    let calls = AtomicU32::new(0);
    let fail = |_: CancellationToken| async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(Error::operation(FailureKind::Network, "connection reset"))
    };

    assert_err!(registry.execute(fail).await);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    registry
        .update_configuration(ResilienceOptions::new().with_retry(RetryOptions {
            max_retry_attempts: 1,
            use_jitter: false,
            ..RetryOptions::default()
        }))
        .unwrap();
    assert_eq!(registry.options().retry.max_retry_attempts, 1);

    calls.store(0, Ordering::SeqCst);
    registry.execute(fail).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reset_empties_metrics() {
    let registry = PipelineRegistry::new(ResilienceOptions::default()).unwrap();
    assert_ok!(registry.execute(|_| async { Ok(1) }).await);
    assert!(!registry.metrics().unwrap().is_empty());
    assert_ok!(registry.reset());
    assert!(registry.metrics().unwrap().is_empty());

    // usable again afterwards
    registry.execute(|_| async { Ok(2) }).await.unwrap();
    assert_eq!(
        registry.metrics().unwrap()["global.requests.success"].count,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_dispose_releases_queued_callers() {
    let registry = Arc::new(PipelineRegistry::new(tight_limiter()).unwrap());
    registry.execute(|_| async { Ok(()) }).await.unwrap();

    let waiting = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.execute(|_| async { Ok(()) }).await })
    };
    let global = registry.global().unwrap();
    while global.signals().rate_limiter.queued < 1 {
        tokio::task::yield_now().await;
    }

    registry.dispose();
    assert!(matches!(waiting.await.unwrap(), Err(Error::Disposed)));
    assert!(global.is_disposed());
    assert!(matches!(
        global.execute(|_| async { Ok(()) }).await,
        Err(Error::Disposed)
    ));
}

#[tokio::test]
async fn test_operations_after_dispose_fail() {
    let registry = PipelineRegistry::new(ResilienceOptions::default()).unwrap();
    registry.dispose();
    assert!(matches!(
        registry.create_endpoint_pipeline("reviews", None),
        Err(Error::Disposed)
    ));
    assert!(matches!(
        registry.get_or_create("reviews", &ResilienceOptions::default()),
        Err(Error::Disposed)
    ));
    assert!(matches!(registry.signals(), Err(Error::Disposed)));
}
