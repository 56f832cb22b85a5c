//! Retry logic.
//!
//! # Responsibilities
//! - Run one logical upstream call as up to `max_attempts` attempts
//! - Report every attempt's outcome to the circuit breaker
//! - Back off exponentially between retryable failures
//!
//! # Design Decisions
//! - Only upstream 429s and timeouts are retried; every other error is
//!   surfaced immediately and does not touch the breaker
//! - The breaker is consulted once by the caller before entering here
//! - Backoff sleeps suspend only the calling task

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::GatewayResult;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Attempt limits and backoff curve.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Executes upstream attempts under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts
    /// run out.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    if err.is_breaker_relevant() {
                        self.breaker.record_failure();
                    }

                    if attempt >= self.policy.max_attempts {
                        tracing::warn!(
                            attempts = attempt,
                            error = %err,
                            "Upstream still failing, giving up"
                        );
                        return Err(err);
                    }

                    let delay = calculate_backoff(attempt, self.policy.base_delay, self.policy.max_delay);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay = ?delay,
                        error = %err,
                        "Retrying upstream call"
                    );
                    metrics::record_retry(err.code());
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
