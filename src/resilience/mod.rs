//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Non-streaming call to upstream:
//!     → circuit_breaker.rs (admit? fail fast when open)
//!     → retries.rs (attempt loop, backoff.rs between 429s/timeouts)
//!         → timeouts.rs (deadline on each attempt)
//!     → circuit_breaker.rs (record success / breaker-relevant failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Streams are never retried; partial output may already be delivered
//! - Circuit breaker prevents hammering an upstream that is shedding load

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retries::{RetryController, RetryPolicy};
