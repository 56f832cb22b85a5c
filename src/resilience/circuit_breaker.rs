//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed overloaded, requests fail fast
//! - Half-Open: testing if upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: first admission check after open_timeout
//! Half-Open → Closed: a probe succeeds
//! Half-Open → Open: a probe fails (count is still >= threshold)
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream endpoint class, shared by every request
//! - Fail fast in Open state (no waiting for timeout)
//! - Half-Open admits every caller; the first recorded outcome decides
//! - Only breaker-relevant failures are recorded (see `GatewayError`)

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Point-in-time view of the breaker, for admin and logging.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    /// Seconds until probes are admitted; zero unless Open.
    pub retry_after_secs: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Process-lifetime circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        metrics::record_breaker_state(CircuitState::Closed);
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            failure_threshold,
            open_timeout,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_secs(config.open_timeout_secs),
        )
    }

    /// Decide whether a call may proceed.
    ///
    /// An Open breaker whose timeout has elapsed moves to Half-Open here.
    pub fn admit(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.open_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    tracing::info!("Circuit breaker: OPEN -> HALF_OPEN (open timeout elapsed)");
                }
                elapsed
            }
        }
    }

    /// Reset the failure count; a Half-Open breaker closes.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            self.transition(&mut inner, CircuitState::Closed);
            tracing::info!("Circuit breaker: HALF_OPEN -> CLOSED (probe succeeded)");
        }
    }

    /// Count a breaker-relevant failure and open once the threshold is met.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if inner.failure_count >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    failures = inner.failure_count,
                    from = inner.state.as_str(),
                    "Circuit breaker: OPEN (too many upstream failures)"
                );
            }
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Time left before an Open breaker admits probes.
    pub fn retry_after(&self) -> Duration {
        let inner = self.lock();
        self.remaining_open(&inner)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            open_timeout_secs: self.open_timeout.as_secs(),
            retry_after_secs: self.remaining_open(&inner).as_secs(),
        }
    }

    fn remaining_open(&self, inner: &Inner) -> Duration {
        match (inner.state, inner.last_failure) {
            (CircuitState::Open, Some(at)) => self.open_timeout.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state != to {
            metrics::record_breaker_transition(inner.state, to);
            inner.state = to;
        }
    }

    /// The guarded state is plain counters, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
