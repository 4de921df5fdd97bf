//! # Live Stream Cache
//!
//! `LiveStreams` hands out one shared [`LiveStream`] per key (the endpoint URL by
//! default, see [`StreamKeyPolicy`](crate::configs::StreamKeyPolicy)). A stream
//! removes itself from the cache when it terminates, so the next request for the
//! same key opens a fresh connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::live::{LiveStream, Subscription};
use super::tail::new_tail_frame;
use super::target::LiveTarget;
use crate::configs::StreamsConfig;
use crate::frames::FrameError;

pub(crate) type StreamRegistry = Mutex<HashMap<String, LiveStream>>;

/// # Live Streams
pub struct LiveStreams {
    streams: Arc<StreamRegistry>,
    config: StreamsConfig,
}

impl Default for LiveStreams {
    fn default() -> Self {
        Self::new(StreamsConfig::default())
    }
}

impl LiveStreams {
    pub fn new(config: StreamsConfig) -> Self {
        Self { streams: Arc::new(Mutex::new(HashMap::new())), config }
    }

    pub fn config(&self) -> &StreamsConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LiveStream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the active stream for the target's key, or builds a new one with an
    /// empty logs buffer of `target.size` rows.
    ///
    /// The new stream connects on its first subscription.
    ///
    /// # Errors
    /// [`FrameError::InvalidCapacity`] if a new stream is needed and `target.size` is zero.
    pub fn get_stream(&self, target: &LiveTarget) -> Result<LiveStream, FrameError> {
        let key = target.stream_key(self.config.key_policy);
        let mut streams = self.lock();
        self.resolve(&mut streams, key, target)
    }

    fn resolve(
        &self,
        streams: &mut HashMap<String, LiveStream>,
        key: String,
        target: &LiveTarget,
    ) -> Result<LiveStream, FrameError> {
        if let Some(stream) = streams.get(&key) {
            if !stream.is_terminated() {
                tracing::debug!("Reusing stream {}", key);
                return Ok(stream.clone());
            }
        }

        let buffer = new_tail_frame(target)?;
        let stream = LiveStream::new(
            key.clone(),
            target.clone(),
            buffer,
            self.config.clone(),
            Arc::downgrade(&self.streams),
        );
        tracing::info!("Created stream {} ({} rows)", key, target.size);
        streams.insert(key, stream.clone());
        Ok(stream)
    }

    /// Resolves the target's stream and subscribes to it under the cache lock, so the
    /// subscription can never land on a stream that is being torn down.
    ///
    /// # Errors
    /// As [`LiveStreams::get_stream`].
    pub fn subscribe(&self, target: &LiveTarget) -> Result<(LiveStream, Subscription), FrameError> {
        let key = target.stream_key(self.config.key_policy);
        let mut streams = self.lock();
        let stream = self.resolve(&mut streams, key, target)?;
        let subscription = stream.subscribe();
        Ok((stream, subscription))
    }

    /// True if an active stream is cached for the target's key.
    pub fn contains(&self, target: &LiveTarget) -> bool {
        self.lock().contains_key(&target.stream_key(self.config.key_policy))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closes every cached stream.
    pub fn close_all(&self) {
        let streams: Vec<LiveStream> = self.lock().values().cloned().collect();
        tracing::info!("Closing {} live streams", streams.len());
        for stream in streams {
            stream.close();
        }
    }
}
