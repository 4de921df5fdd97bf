//! # lib_frames
//!
//! Real-time columnar ingestion for live log tailing.
//!
//! The crate is split into feature-gated folders:
//!
//! - **`frames`**: the columnar `DataFrame` model, the JSON transfer codec that
//!   restores values JSON cannot carry (NaN, ±Infinity, missing), and the
//!   fixed-capacity `CircularDataFrame`.
//! - **`streams`**: one reconnecting websocket connection per target, fanned out
//!   to any number of subscribers through the `LiveStreams` cache.
//! - **`configs`**: reconnect, backoff and multiplexing settings.
//! - **`loggers`**: `tracing` subscriber setup for binaries.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "frames")]
pub mod frames;

#[cfg(feature = "streams")]
pub mod streams;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;

// --- Public API Re-exports ---
#[cfg(feature = "frames")]
pub use frames::{
    data_frame_from_json, data_frame_to_json, CircularDataFrame, DataFrame, DataFrameJson, Field,
    FieldType, FieldValue, FrameError, Labels,
};

#[cfg(feature = "streams")]
pub use streams::{LiveStream, LiveStreams, LiveTarget, StreamError, StreamEvent, Subscription};

#[cfg(feature = "configs")]
pub use configs::{BackoffPolicy, StreamKeyPolicy, StreamsConfig};
