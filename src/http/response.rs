//! Response shaping.
//!
//! # Responsibilities
//! - Map `GatewayError` kinds to HTTP status codes
//! - Attach `Retry-After` for "try again later" errors
//! - Attach `X-RateLimit-Remaining` to admitted responses
//!
//! # Design Decisions
//! - Error bodies always carry a stable `code` so clients can tell "try
//!   again later" from "do not retry" without parsing messages
//! - Upstream error bodies are logged, only their message is returned

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::GatewayError;

pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } | GatewayError::UpstreamRateLimited(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        if matches!(self, GatewayError::ServiceUnavailable { .. }) {
            body["circuit_breaker_status"] = json!("OPEN");
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after() {
            // Round up so callers never retry inside the same window
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

/// Add the caller's remaining request budget, when rate limiting is on.
pub fn with_remaining(mut response: Response, remaining: Option<u32>) -> Response {
    if let Some(remaining) = remaining {
        response
            .headers_mut()
            .insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GatewayError::RateLimited { retry_after: Duration::from_secs(3) }, 429),
            (GatewayError::ServiceUnavailable { retry_after: Duration::from_secs(3) }, 503),
            (GatewayError::UpstreamRateLimited("q".into()), 429),
            (GatewayError::upstream("x"), 502),
            (GatewayError::Timeout(Duration::from_secs(60)), 504),
            (GatewayError::NotFound("none".into()), 404),
            (GatewayError::InvalidRequest("bad".into()), 400),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn test_retry_after_header_rounds_up() {
        let response = GatewayError::ServiceUnavailable {
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_plain_errors_have_no_retry_after() {
        let response = GatewayError::upstream("x").into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_remaining_header() {
        let response = with_remaining(StatusCode::OK.into_response(), Some(7));
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "7");
        let response = with_remaining(StatusCode::OK.into_response(), None);
        assert!(response.headers().get(X_RATELIMIT_REMAINING).is_none());
    }
}
