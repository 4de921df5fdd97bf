use std::sync::Arc;

use lib_frames::{LiveStreams, StreamsConfig};

#[derive(Clone)]
pub struct AppState {
    // Shared upstream streams, one per key
    pub streams: Arc<LiveStreams>,
    // Buffer rows for requests without a size
    pub default_size: usize,
}

impl AppState {
    pub fn new(config: StreamsConfig, default_size: usize) -> Self {
        Self { streams: Arc::new(LiveStreams::new(config)), default_size }
    }
}
