//! # Configuration Module
//!
//! Settings for live streams: reconnect delays, backoff policy, how streams are
//! shared between requests and how long an unused stream stays connected.
//!
//! ## Contained Modules:
//!
//! - **`config_streams`**: `StreamsConfig`, loaded from a JSON file and overridden
//!   by `TAIL_*` environment variables.

/// Live stream tuning.
pub mod config_streams;

// --- Public API Re-exports ---
pub use config_streams::{BackoffPolicy, ConfigError, ParsePolicyError, StreamKeyPolicy, StreamsConfig};
