//! # Streams Module
//!
//! Live tail streams. Each stream owns one websocket connection and one
//! [`CircularDataFrame`](crate::frames::CircularDataFrame); every message it
//! receives is merged into the buffer and a snapshot of the buffer is delivered to
//! all current subscribers.
//!
//! ## Contained Modules:
//!
//! - **`target`**: `LiveTarget`, the description of what to tail, and the key used
//!   to share one stream between requests.
//! - **`tail`**: merges inbound messages (log tail responses or frame JSON) into the
//!   buffer and builds the initial logs frame.
//! - **`driver`**: the reconnecting websocket state machine.
//! - **`live`**: `LiveStream` and `Subscription`, the fan-out to subscribers.
//! - **`cache`**: `LiveStreams`, the per-key stream cache with eviction.

use std::sync::Arc;

use thiserror::Error;

use crate::frames::DataFrame;

pub mod cache;
mod driver;
pub mod live;
pub mod tail;
pub mod target;

#[cfg(test)]
mod test_server;

// --- Public API Re-exports ---
pub use cache::LiveStreams;
pub use live::{LiveStream, Subscription};
pub use tail::{append_frame_json, append_response_to_buffered_data, new_tail_frame, LokiTailResponse, TailMessage};
pub use target::LiveTarget;

/// Terminal failures of a live stream. Transient closures are retried by the
/// driver and never reach subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Stream closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("Invalid stream endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Gave up on {url} after {attempts} failed reconnect attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    #[error("Websocket transport error: {0}")]
    Transport(String),
}

/// One item delivered to a subscriber: a snapshot of the buffer after a message
/// was merged, or the error that ended the stream.
pub type StreamEvent = Result<Arc<DataFrame>, StreamError>;
