//! Query result caching.
//!
//! Only successful retrieval queries are cached. Generation calls depend on
//! conversation state and streams are consumed as they arrive, so neither
//! goes through here.

pub mod store;

pub use store::{CacheStats, QueryKey, ResultCache};
