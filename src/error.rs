//! Error definitions shared by the gateway components.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the gateway.
///
/// The variants separate "try again later" (`RateLimited`,
/// `ServiceUnavailable`), "the gateway already retried"
/// (`UpstreamRateLimited`, `Timeout`) and "do not retry" (everything else).
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Caller exceeded its request window. Never retried.
    #[error("Rate limit exceeded, retry in {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Circuit is open; upstream was not contacted.
    #[error("Service temporarily unavailable, retry in {}s", .retry_after.as_secs())]
    ServiceUnavailable { retry_after: Duration },

    /// Upstream answered 429.
    #[error("Upstream rate limit reached: {0}")]
    UpstreamRateLimited(String),

    /// Any other upstream failure.
    #[error("Upstream error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    /// Upstream call exceeded its deadline.
    #[error("Upstream timeout after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// Nothing to search.
    #[error("{0}")]
    NotFound(String),

    /// Request body rejected before any upstream contact.
    #[error("{0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// Whether the retry controller may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamRateLimited(_) | Self::Timeout(_))
    }

    /// Whether this outcome counts toward the circuit breaker threshold.
    pub fn is_breaker_relevant(&self) -> bool {
        matches!(self, Self::UpstreamRateLimited(_) | Self::Timeout(_))
    }

    /// Stable machine-readable identifier for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::UpstreamRateLimited(_) => "upstream_rate_limited",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Suggested wait before the caller tries again, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::ServiceUnavailable { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let limited = GatewayError::UpstreamRateLimited("quota".into());
        assert!(limited.is_retryable());
        assert!(limited.is_breaker_relevant());

        let timeout = GatewayError::Timeout(Duration::from_secs(60));
        assert!(timeout.is_retryable());
        assert!(timeout.is_breaker_relevant());

        let generic = GatewayError::Upstream {
            status: Some(500),
            message: "boom".into(),
        };
        assert!(!generic.is_retryable());
        assert!(!generic.is_breaker_relevant());

        let local = GatewayError::RateLimited {
            retry_after: Duration::from_secs(5),
        };
        assert!(!local.is_retryable());
        assert_eq!(local.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_display() {
        let err = GatewayError::Upstream {
            status: Some(503),
            message: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "Upstream error (503): overloaded");
        assert_eq!(GatewayError::upstream("x").to_string(), "Upstream error: x");
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(60)).to_string(),
            "Upstream timeout after 60 seconds"
        );
    }
}
