//! Resilience policies and their composition.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Sliding-window admission control with a bounded FIFO queue |
//! | [`circuit_breaker`] | Failure-ratio breaker over a sampling window |
//! | [`retry`] | Backoff retries for transient failures |
//! | [`timeout`] | Per-attempt deadline with cooperative cancellation |
//! | [`pipeline`] | The four policies composed around one operation |
//! | [`registry`] | Per-scope pipeline cache, live options and disposal |
//!
//! ## Layer order
//!
//! ```text
//! caller -> RateLimiter -> CircuitBreaker -> RetryExecutor -> TimeoutGuard -> operation
//! ```
//!
//! Admission is decided once per call, the breaker sees one outcome per call,
//! and each retry attempt gets a fresh deadline.
//!
//! ```rust
//! use manuscript_review::config::ResilienceOptions;
//! use manuscript_review::resilience::PipelineRegistry;
//!
//! # async fn demo() -> manuscript_review::Result<()> {
//! let registry = PipelineRegistry::new(ResilienceOptions::default())?;
//! let reviews = registry
//!     .execute_endpoint("reviews", |_cancel| async { Ok(vec!["r-1", "r-2"]) })
//!     .await?;
//! assert_eq!(reviews.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod pipeline;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use pipeline::{Pipeline, PipelineSignals, GLOBAL_SCOPE};
pub use rate_limiter::{RateLimitPermit, RateLimiter, RateLimiterSnapshot};
pub use registry::PipelineRegistry;
pub use retry::RetryExecutor;
pub use timeout::TimeoutGuard;
