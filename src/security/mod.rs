//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → http layer (body size limit, query text validation)
//!     → rate_limit.rs (per-identity sliding window, inside the gateway)
//!     → upstream
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any check failure, before upstream contact
//! - No trust in client input

pub mod rate_limit;
pub mod validation;

pub use rate_limit::{LimiterStats, RateLimiter};
