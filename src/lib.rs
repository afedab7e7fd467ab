//! # manuscript-review
//!
//! Client for the manuscript-review service, built around a resilience
//! pipeline that every outbound call goes through.
//!
//! ## Overview
//!
//! Calls to the review service are wrapped, outermost first, by a rate
//! limiter, a circuit breaker, a retry executor and a per-attempt timeout.
//! Pipelines are cached per scope: one global pipeline plus optional
//! per-endpoint pipelines with their own options. Outcomes and latencies are
//! recorded in a shared metrics collector.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use manuscript_review::{ReviewClientBuilder, ResilienceOptions, TransportRequest};
//!
//! #[tokio::main]
//! async fn main() -> manuscript_review::Result<()> {
//!     manuscript_review::telemetry::init_tracing();
//!
//!     let client = ReviewClientBuilder::new()
//!         .options(ResilienceOptions::default())
//!         .with_env_overrides(true)
//!         .base_url_override("https://reviews.example.org/api")
//!         .api_key("your-api-key")
//!         .endpoint("submissions", None)
//!         .build()?;
//!
//!     let manuscript: serde_json::Value = client
//!         .send_json_to("submissions", TransportRequest::get("/manuscripts/42"))
//!         .await?;
//!     println!("{}", manuscript);
//!     println!("{:?}", client.metrics()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Review client and builder |
//! | [`config`] | Resilience options, file/env loading and validation |
//! | [`error`] | Error type and context |
//! | [`failure`] | Failure classification driving retries and the breaker |
//! | [`resilience`] | Policies, pipeline composition and the registry |
//! | [`telemetry`] | Metrics collector and tracing setup |
//! | [`transport`] | Transport trait and the HTTP implementation |

pub mod client;
pub mod config;
pub mod failure;
pub mod resilience;
pub mod telemetry;
pub mod transport;

pub use client::{ReviewClient, ReviewClientBuilder, SignalsSnapshot};
pub use config::{
    BackoffType, CircuitBreakerOptions, RateLimitingOptions, ResilienceOptions, RetryOptions,
    TimeoutOptions,
};
pub use failure::FailureKind;
pub use resilience::{Pipeline, PipelineRegistry};
pub use telemetry::{CounterSnapshot, MetricsCollector, MetricsSnapshot};
pub use transport::{Transport, TransportRequest, TransportResponse};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, Layer};
