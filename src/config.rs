//! Resilience configuration.
//!
//! [`ResilienceOptions`] is an immutable bundle: a pipeline is built from one
//! snapshot and never observes later edits. Reconfiguring means handing a new
//! bundle to [`PipelineRegistry::update_configuration`](crate::resilience::registry::PipelineRegistry::update_configuration),
//! which rebuilds pipelines lazily.
//!
//! Options can be written in code, loaded from YAML or JSON (durations are
//! expressed in milliseconds), and overridden from the environment:
//!
//! ```rust
//! use manuscript_review::config::ResilienceOptions;
//!
//! let yaml = r#"
//! rate_limiting:
//!   permit_limit: 5
//!   window_ms: 1000
//!   segments_per_window: 2
//!   queue_limit: 2
//! retry:
//!   max_retry_attempts: 2
//!   delay_ms: 100
//!   backoff_type: exponential
//!   use_jitter: false
//! "#;
//! let options = ResilienceOptions::from_yaml_str(yaml).unwrap();
//! assert_eq!(options.rate_limiting.permit_limit, 5);
//! assert!(options.validate().is_ok());
//! ```

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Top-level resilience configuration for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceOptions {
    /// Master switch. When false every policy is a pass-through.
    pub enabled: bool,
    pub rate_limiting: RateLimitingOptions,
    pub circuit_breaker: CircuitBreakerOptions,
    pub retry: RetryOptions,
    pub timeout: TimeoutOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingOptions {
    pub enabled: bool,
    /// Permits available per window.
    pub permit_limit: u32,
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    pub segments_per_window: u32,
    /// Callers allowed to wait for a permit once the window is exhausted.
    pub queue_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOptions {
    pub enabled: bool,
    /// Failure ratio in (0, 1] at or above which the circuit opens.
    pub failure_ratio: f64,
    /// Calls required within the sampling window before the ratio is considered.
    pub minimum_throughput: u32,
    #[serde(rename = "sampling_duration_ms", with = "duration_ms")]
    pub sampling_duration: Duration,
    #[serde(rename = "break_duration_ms", with = "duration_ms")]
    pub break_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub enabled: bool,
    /// Retries after the first attempt.
    pub max_retry_attempts: u32,
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,
    pub backoff_type: BackoffType,
    pub use_jitter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutOptions {
    pub enabled: bool,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for ResilienceOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limiting: RateLimitingOptions::default(),
            circuit_breaker: CircuitBreakerOptions::default(),
            retry: RetryOptions::default(),
            timeout: TimeoutOptions::default(),
        }
    }
}

impl Default for RateLimitingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            permit_limit: 100,
            window: Duration::from_secs(1),
            segments_per_window: 10,
            queue_limit: 0,
        }
    }
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_ratio: 0.5,
            minimum_throughput: 10,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(30),
        }
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retry_attempts: 3,
            delay: Duration::from_secs(1),
            backoff_type: BackoffType::Exponential,
            use_jitter: true,
        }
    }
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(30),
        }
    }
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("options_validator"),
    )
}

impl ResilienceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with every policy switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_rate_limiting(mut self, rate_limiting: RateLimitingOptions) -> Self {
        self.rate_limiting = rate_limiting;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerOptions) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutOptions) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load options from a `.yaml`/`.yml` or `.json` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(Error::configuration_with_context(
                "unsupported options file extension",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(format!("extension: {:?}", other))
                    .with_source("options_loader"),
            )),
        }
    }

    /// Apply `REVIEW_*` environment overrides.
    ///
    /// Recognised variables: `REVIEW_RESILIENCE_ENABLED`, `REVIEW_RATE_LIMIT_PERMITS`,
    /// `REVIEW_RATE_LIMIT_WINDOW_MS`, `REVIEW_RATE_LIMIT_QUEUE`,
    /// `REVIEW_BREAKER_FAILURE_RATIO`, `REVIEW_BREAKER_MIN_THROUGHPUT`,
    /// `REVIEW_BREAKER_BREAK_MS`, `REVIEW_RETRY_MAX_ATTEMPTS`, `REVIEW_RETRY_DELAY_MS`,
    /// `REVIEW_TIMEOUT_MS`. Values that fail to parse are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse::<T>().ok())
        }

        if let Some(v) = parsed::<bool>(&lookup, "REVIEW_RESILIENCE_ENABLED") {
            self.enabled = v;
        }
        if let Some(v) = parsed::<u32>(&lookup, "REVIEW_RATE_LIMIT_PERMITS") {
            self.rate_limiting.permit_limit = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "REVIEW_RATE_LIMIT_WINDOW_MS") {
            self.rate_limiting.window = Duration::from_millis(v);
        }
        if let Some(v) = parsed::<u32>(&lookup, "REVIEW_RATE_LIMIT_QUEUE") {
            self.rate_limiting.queue_limit = v;
        }
        if let Some(v) = parsed::<f64>(&lookup, "REVIEW_BREAKER_FAILURE_RATIO") {
            self.circuit_breaker.failure_ratio = v;
        }
        if let Some(v) = parsed::<u32>(&lookup, "REVIEW_BREAKER_MIN_THROUGHPUT") {
            self.circuit_breaker.minimum_throughput = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "REVIEW_BREAKER_BREAK_MS") {
            self.circuit_breaker.break_duration = Duration::from_millis(v);
        }
        if let Some(v) = parsed::<u32>(&lookup, "REVIEW_RETRY_MAX_ATTEMPTS") {
            self.retry.max_retry_attempts = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "REVIEW_RETRY_DELAY_MS") {
            self.retry.delay = Duration::from_millis(v);
        }
        if let Some(v) = parsed::<u64>(&lookup, "REVIEW_TIMEOUT_MS") {
            self.timeout.timeout = Duration::from_millis(v);
        }
        self
    }

    /// Reject values the policies cannot run with.
    ///
    /// Sub-options that are disabled are not checked.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.enabled {
            if rl.permit_limit == 0 {
                return Err(invalid("rate_limiting.permit_limit", "permit_limit must be at least 1"));
            }
            if rl.segments_per_window == 0 {
                return Err(invalid(
                    "rate_limiting.segments_per_window",
                    "segments_per_window must be at least 1",
                ));
            }
            if rl.window.is_zero() || rl.window / rl.segments_per_window == Duration::ZERO {
                return Err(invalid(
                    "rate_limiting.window_ms",
                    "window must be long enough to hold every segment",
                ));
            }
        }

        let cb = &self.circuit_breaker;
        if cb.enabled {
            if !(cb.failure_ratio > 0.0 && cb.failure_ratio <= 1.0) {
                return Err(invalid(
                    "circuit_breaker.failure_ratio",
                    format!("failure_ratio must be in (0, 1], got {}", cb.failure_ratio),
                ));
            }
            if cb.minimum_throughput == 0 {
                return Err(invalid(
                    "circuit_breaker.minimum_throughput",
                    "minimum_throughput must be at least 1",
                ));
            }
            if cb.sampling_duration.is_zero() {
                return Err(invalid(
                    "circuit_breaker.sampling_duration_ms",
                    "sampling_duration must be positive",
                ));
            }
            if cb.break_duration.is_zero() {
                return Err(invalid(
                    "circuit_breaker.break_duration_ms",
                    "break_duration must be positive",
                ));
            }
        }

        if self.timeout.enabled && self.timeout.timeout.is_zero() {
            return Err(invalid("timeout.timeout_ms", "timeout must be positive"));
        }

        Ok(())
    }
}
