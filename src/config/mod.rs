//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → values handed to each component at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breaker and limiter state live for the
//!   whole process, so there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, CircuitBreakerConfig, GatewayConfig, GenerationConfig,
    ListenerConfig, ObservabilityConfig, RateLimitConfig, RetryConfig, SecurityConfig,
    StreamConfig, UpstreamConfig,
};
