use crate::failure::FailureKind;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for configuration and validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "retry.delay_ms")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "options_validator", "pipeline_registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The pipeline layer that terminated a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    RateLimiter,
    CircuitBreaker,
    Retry,
    Timeout,
    Operation,
    Lifecycle,
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::RateLimiter => "rate_limiter",
            Layer::CircuitBreaker => "circuit_breaker",
            Layer::Retry => "retry",
            Layer::Timeout => "timeout",
            Layer::Operation => "operation",
            Layer::Lifecycle => "lifecycle",
        }
    }
}

/// Unified error type for the manuscript-review client.
///
/// Every resilience layer surfaces its own variant so callers can tell
/// "we are being throttled" apart from "the dependency is down" or
/// "this attempt was slow".
#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit rejected request for scope '{scope}' (queue limit {queue_limit} reached)")]
    RateLimitRejected { scope: String, queue_limit: u32 },

    #[error("Circuit open for scope '{scope}'{}", format_retry_after(.retry_after))]
    CircuitOpen {
        scope: String,
        retry_after: Option<Duration>,
    },

    #[error("Retries exhausted for scope '{scope}' after {attempts} attempts (last failure: {last_kind}): {last}")]
    RetriesExhausted {
        scope: String,
        attempts: u32,
        last_kind: FailureKind,
        #[source]
        last: Box<Error>,
    },

    #[error("Attempt timed out for scope '{scope}' after {}ms", .timeout.as_millis())]
    Timeout { scope: String, timeout: Duration },

    #[error("Pipeline registry has been disposed")]
    Disposed,

    #[error("Remote error: HTTP {status} ({kind}): {message}")]
    Remote {
        status: u16,
        kind: FailureKind,
        message: String,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Operation failed ({kind}): {message}")]
    Operation { kind: FailureKind, message: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create an operation failure classified by the caller.
    pub fn operation(kind: FailureKind, msg: impl Into<String>) -> Self {
        Error::Operation {
            kind,
            message: msg.into(),
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// The failure category of an operation outcome.
    ///
    /// `RetriesExhausted` reports the kind of its last attempt. Policy rejections
    /// and ambient errors have no kind.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Remote { kind, .. } | Error::Operation { kind, .. } => Some(*kind),
            Error::Transport(e) => Some(e.kind()),
            Error::Timeout { .. } => Some(FailureKind::Timeout),
            Error::RetriesExhausted { last_kind, .. } => Some(*last_kind),
            _ => None,
        }
    }

    /// Whether a single failed attempt may be repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RetriesExhausted { .. } => false,
            _ => self.failure_kind().map(|k| k.retryable()).unwrap_or(false),
        }
    }

    /// Whether the outcome says something bad about the remote dependency's health.
    ///
    /// Client-side failures (4xx, validation) mean the dependency answered, so they
    /// do not count against a circuit breaker.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self.failure_kind(), Some(kind) if kind != FailureKind::Client)
    }

    /// The pipeline layer that produced this error.
    pub fn terminating_layer(&self) -> Layer {
        match self {
            Error::RateLimitRejected { .. } => Layer::RateLimiter,
            Error::CircuitOpen { .. } => Layer::CircuitBreaker,
            Error::RetriesExhausted { .. } => Layer::Retry,
            Error::Timeout { .. } => Layer::Timeout,
            Error::Disposed => Layer::Lifecycle,
            _ => Layer::Operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display() {
        let err = Error::configuration_with_context(
            "failure_ratio must be in (0, 1]",
            ErrorContext::new()
                .with_field_path("circuit_breaker.failure_ratio")
                .with_source("options_validator"),
        );
        let text = err.to_string();
        assert!(text.contains("field: circuit_breaker.failure_ratio"));
        assert!(text.contains("source: options_validator"));
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("circuit_breaker.failure_ratio")
        );
    }

    #[test]
    fn test_layers_are_distinct() {
        let errors = [
            Error::RateLimitRejected {
                scope: "global".into(),
                queue_limit: 0,
            },
            Error::CircuitOpen {
                scope: "global".into(),
                retry_after: Some(Duration::from_secs(1)),
            },
            Error::RetriesExhausted {
                scope: "global".into(),
                attempts: 3,
                last_kind: FailureKind::Network,
                last: Box::new(Error::operation(FailureKind::Network, "reset")),
            },
            Error::Timeout {
                scope: "global".into(),
                timeout: Duration::from_secs(1),
            },
            Error::operation(FailureKind::Client, "bad request"),
            Error::Disposed,
        ];
        let layers: std::collections::HashSet<_> =
            errors.iter().map(|e| e.terminating_layer()).collect();
        assert_eq!(layers.len(), errors.len());
    }

    #[test]
    fn test_retryability() {
        assert!(Error::operation(FailureKind::Server, "503").is_retryable());
        assert!(!Error::operation(FailureKind::Client, "400").is_retryable());
        assert!(Error::Timeout {
            scope: "x".into(),
            timeout: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(!Error::Disposed.is_retryable());
        assert!(!Error::CircuitOpen {
            scope: "x".into(),
            retry_after: None
        }
        .is_retryable());
    }

    #[test]
    fn test_retries_exhausted_keeps_last_kind() {
        let err = Error::RetriesExhausted {
            scope: "submissions".into(),
            attempts: 3,
            last_kind: FailureKind::Server,
            last: Box::new(Error::Remote {
                status: 502,
                kind: FailureKind::Server,
                message: "bad gateway".into(),
            }),
        };
        assert_eq!(err.failure_kind(), Some(FailureKind::Server));
        assert!(!err.is_retryable());
        assert!(err.is_dependency_failure());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_client_failures_are_not_dependency_failures() {
        assert!(!Error::operation(FailureKind::Client, "422").is_dependency_failure());
        assert!(Error::operation(FailureKind::Network, "refused").is_dependency_failure());
        assert!(!Error::validation_with_context("bad", ErrorContext::new()).is_dependency_failure());
    }
}
