//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, graceful shutdown)
//!     → request.rs (request ID, caller identity)
//!     → handlers.rs (validate, call the gateway)
//!     → response.rs (status mapping, Retry-After, X-RateLimit-Remaining)
//!     → Send to client (JSON body or SSE stream)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
