//! Timeout enforcement.
//!
//! Every upstream exchange has a wall-clock deadline. Expiry becomes
//! `GatewayError::Timeout`, which is retryable and breaker-relevant.

use std::future::Future;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Run `fut` with a deadline, flattening the timeout into `GatewayError`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}
