//! Incremental generation relay.
//!
//! # Data Flow
//! ```text
//! upstream bytes_stream()
//!     → frame.rs (line reassembly, `data:` JSON decoding)
//!     → relay.rs (bounded channel, idle deadline, terminal event)
//!     → event.rs (downstream SSE frames)
//! ```

pub mod event;
pub mod frame;
pub mod relay;

pub use event::{EventStream, StreamEvent};
pub use relay::{RelayOutcome, RelaySettings, StreamRelay};
