//! Failure classification shared by the transport boundary and the retry policy.
//!
//! The resilience pipeline does not know HTTP. All it needs from a failed
//! operation is one of the categories below, which decides whether the
//! failure is worth another attempt.
//!
//! | Kind        | Typical cause                         | Retryable |
//! |-------------|---------------------------------------|-----------|
//! | `Network`   | connection refused, reset, DNS        | yes       |
//! | `Server`    | HTTP 5xx, 408, 429                    | yes       |
//! | `Client`    | HTTP 4xx, validation                  | no        |
//! | `Cancelled` | request cancelled (usually a timeout) | yes       |
//! | `Timeout`   | attempt exceeded the pipeline timeout | yes       |
//!
//! ## Example
//!
//! ```rust
//! use manuscript_review::failure::FailureKind;
//!
//! let kind = FailureKind::from_http_status(503);
//! assert_eq!(kind, Some(FailureKind::Server));
//! assert!(kind.unwrap().retryable());
//! assert!(!FailureKind::Client.retryable());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport-level failure before a response was received.
    Network,
    /// 5xx-equivalent failure reported by the remote service.
    Server,
    /// 4xx-equivalent failure caused by the request itself.
    Client,
    /// The request was cancelled before it completed.
    Cancelled,
    /// The attempt was abandoned by the pipeline's timeout guard.
    Timeout,
}

impl FailureKind {
    /// Returns the stable snake_case name used in metric keys and logs.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Server => "server",
            Self::Client => "client",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    /// Returns whether another attempt may succeed.
    #[inline]
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::Client)
    }

    /// Maps an HTTP status to a failure kind. Returns `None` for non-error statuses.
    ///
    /// 408 (request timeout) and 429 (too many requests) are treated as server-side
    /// conditions because repeating the identical request later can succeed.
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            408 | 429 => Some(Self::Server),
            400..=499 => Some(Self::Client),
            500..=599 => Some(Self::Server),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(FailureKind::from_http_status(200), None);
        assert_eq!(FailureKind::from_http_status(304), None);
        assert_eq!(FailureKind::from_http_status(400), Some(FailureKind::Client));
        assert_eq!(FailureKind::from_http_status(404), Some(FailureKind::Client));
        assert_eq!(FailureKind::from_http_status(422), Some(FailureKind::Client));
        assert_eq!(FailureKind::from_http_status(408), Some(FailureKind::Server));
        assert_eq!(FailureKind::from_http_status(429), Some(FailureKind::Server));
        assert_eq!(FailureKind::from_http_status(500), Some(FailureKind::Server));
        assert_eq!(FailureKind::from_http_status(503), Some(FailureKind::Server));
    }

    #[test]
    fn test_only_client_failures_are_final() {
        let retryable = [
            FailureKind::Network,
            FailureKind::Server,
            FailureKind::Cancelled,
            FailureKind::Timeout,
        ];
        for kind in retryable {
            assert!(kind.retryable(), "{} should be retryable", kind);
        }
        assert!(!FailureKind::Client.retryable());
    }

    #[test]
    fn test_names_are_snake_case() {
        assert_eq!(FailureKind::Network.to_string(), "network");
        assert_eq!(FailureKind::Cancelled.name(), "cancelled");
        let json = serde_json::to_string(&FailureKind::Server).unwrap();
        assert_eq!(json, "\"server\"");
    }
}
