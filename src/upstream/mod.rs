//! Upstream service access.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → gateway.rs (rate limit, cache, breaker, retries, deadlines)
//!         → client.rs (REST calls through the `Upstream` trait)
//!             → prompt.rs (generation payloads)
//!     → streaming::relay (streaming generations)
//! ```

pub mod client;
pub mod gateway;
pub mod prompt;
pub mod types;

pub use client::{ByteStream, GeminiClient, Upstream};
pub use gateway::Gateway;
pub use types::{ChatMessage, GenerateRequest, GenerateResponse, QueryRequest, UpstreamRequest};
