//! # Live Streams and Subscriptions
//!
//! A [`LiveStream`] is a cheap, cloneable handle to one shared stream. The driver
//! behind it starts with the first [`Subscription`] and is torn down once the last
//! subscription is dropped (after the configured linger period).
//!
//! Teardown evicts the stream from its cache before the driver has unwound, so a
//! request racing the teardown always gets a fresh connection.
//!
//! Every subscriber owns an unbounded channel, so it sees every snapshot in order
//! and a slow subscriber never blocks the driver or other subscribers. Snapshots
//! are shared `Arc<DataFrame>`s; fan-out copies pointers, never frames.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::cache::StreamRegistry;
use super::driver::{Outcome, StreamDriver};
use super::target::LiveTarget;
use super::{StreamError, StreamEvent};
use crate::configs::StreamsConfig;
use crate::frames::{CircularDataFrame, DataFrame};

enum Status {
    /// Built but no one subscribed yet; holds the buffer the driver will own.
    Idle(CircularDataFrame),
    Running,
    /// Torn down and evicted; the driver is still unwinding.
    Closing,
    Terminated(Option<StreamError>),
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<StreamEvent>,
}

struct StreamState {
    status: Status,
    subscribers: Vec<Subscriber>,
    latest: Option<Arc<DataFrame>>,
    next_id: u64,
    /// Pending teardown after the last subscriber left.
    linger: Option<CancellationToken>,
}

pub(crate) struct StreamInner {
    key: String,
    target: LiveTarget,
    config: StreamsConfig,
    cancel: CancellationToken,
    registry: Weak<StreamRegistry>,
    state: Mutex<StreamState>,
}

impl StreamInner {
    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers a snapshot to every subscriber and keeps it for late joiners.
    pub(crate) fn publish(&self, frame: Arc<DataFrame>) {
        let mut state = self.lock_state();
        state.subscribers.retain(|s| s.sender.send(Ok(Arc::clone(&frame))).is_ok());
        state.latest = Some(frame);
    }

    /// Ends the stream: subscribers get the error (if any) and then see the end of
    /// their channel, and the cache entry is removed.
    fn finish(self: &Arc<Self>, outcome: Outcome) {
        let error = match outcome {
            Outcome::Completed => {
                tracing::info!("Stream {} completed", self.key);
                None
            }
            Outcome::Cancelled => {
                tracing::info!("Stream {} closed", self.key);
                None
            }
            Outcome::Failed(err) => {
                tracing::error!("Stream {} terminated: {}", self.key, err);
                Some(err)
            }
        };

        {
            let mut state = self.lock_state();
            for subscriber in state.subscribers.drain(..) {
                if let Some(err) = &error {
                    let _ = subscriber.sender.send(Err(err.clone()));
                }
            }
            if let Some(token) = state.linger.take() {
                token.cancel();
            }
            state.status = Status::Terminated(error);
        }

        self.evict();
    }

    /// Removes this stream from its cache, unless the key already maps to a newer one.
    fn evict(self: &Arc<Self>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut streams = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if streams.get(&self.key).is_some_and(|s| Arc::ptr_eq(&s.inner, self)) {
            streams.remove(&self.key);
            tracing::debug!("Evicted stream {}", self.key);
        }
    }

    /// Marks the stream as closing and cancels the driver. Must be called with the
    /// state lock held; the caller evicts once the lock is released.
    fn begin_close(&self, state: &mut StreamState) {
        state.status = Status::Closing;
        if let Some(token) = state.linger.take() {
            token.cancel();
        }
        self.cancel.cancel();
    }

    fn unsubscribe(self: &Arc<Self>, id: u64) {
        {
            let mut state = self.lock_state();
            state.subscribers.retain(|s| s.id != id);
            if !state.subscribers.is_empty() || !matches!(state.status, Status::Running) {
                return;
            }

            let linger = self.config.linger();
            let handle = tokio::runtime::Handle::try_current();
            match handle {
                Ok(handle) if !linger.is_zero() => {
                    let token = CancellationToken::new();
                    state.linger = Some(token.clone());
                    handle.spawn(Arc::clone(self).linger(token, linger));
                    return;
                }
                _ => {
                    tracing::info!("Last subscriber left {}, closing stream", self.key);
                    self.begin_close(&mut state);
                }
            }
        }

        self.evict();
    }

    async fn linger(self: Arc<Self>, token: CancellationToken, linger: std::time::Duration) {
        tokio::select! {
            // Someone re-subscribed.
            _ = token.cancelled() => {
                tracing::debug!("Linger cancelled for {}", self.key);
            }
            _ = tokio::time::sleep(linger) => {
                {
                    let mut state = self.lock_state();
                    if !state.subscribers.is_empty() || !matches!(state.status, Status::Running) {
                        return;
                    }
                    tracing::info!("Linger expired for {}, closing stream", self.key);
                    self.begin_close(&mut state);
                }
                self.evict();
            }
        }
    }
}

/// # Live Stream
///
/// Handle to one shared stream. Clones refer to the same connection and buffer.
#[derive(Clone)]
pub struct LiveStream {
    pub(crate) inner: Arc<StreamInner>,
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("key", &self.inner.key)
            .field("url", &self.inner.target.url)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl LiveStream {
    pub(crate) fn new(
        key: String,
        target: LiveTarget,
        buffer: CircularDataFrame,
        config: StreamsConfig,
        registry: Weak<StreamRegistry>,
    ) -> Self {
        let state = StreamState {
            status: Status::Idle(buffer),
            subscribers: Vec::new(),
            latest: None,
            next_id: 0,
            linger: None,
        };
        Self {
            inner: Arc::new(StreamInner {
                key,
                target,
                config,
                cancel: CancellationToken::new(),
                registry,
                state: Mutex::new(state),
            }),
        }
    }

    /// The cache key this stream is registered under.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The target that created this stream.
    pub fn target(&self) -> &LiveTarget {
        &self.inner.target
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_state().subscribers.len()
    }

    /// The most recent snapshot, if any message arrived yet.
    pub fn latest(&self) -> Option<Arc<DataFrame>> {
        self.inner.lock_state().latest.clone()
    }

    /// True once the stream is closing or has ended. A terminated stream never
    /// reconnects; the cache replaces it on the next request.
    pub fn is_terminated(&self) -> bool {
        matches!(self.inner.lock_state().status, Status::Closing | Status::Terminated(_))
    }

    /// True if both handles refer to the same underlying stream.
    pub fn same_stream(&self, other: &LiveStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribes to snapshots. The latest snapshot, if any, is delivered first.
    ///
    /// The first subscription starts the driver, so this must be called from within
    /// a Tokio runtime. Subscribing to a terminated stream yields its terminal
    /// error, if it had one, and then ends.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.inner.lock_state();

        match &state.status {
            Status::Terminated(error) => {
                if let Some(err) = error {
                    let _ = sender.send(Err(err.clone()));
                }
                return Subscription { id: 0, receiver, stream: None };
            }
            Status::Closing => return Subscription { id: 0, receiver, stream: None },
            _ => {}
        }

        let id = state.next_id;
        state.next_id += 1;
        if let Some(latest) = &state.latest {
            let _ = sender.send(Ok(Arc::clone(latest)));
        }
        state.subscribers.push(Subscriber { id, sender });

        if let Some(token) = state.linger.take() {
            token.cancel();
        }

        if matches!(state.status, Status::Idle(_)) {
            if let Status::Idle(buffer) = std::mem::replace(&mut state.status, Status::Running) {
                self.start(buffer);
            }
        }

        Subscription { id, receiver, stream: Some(Arc::clone(&self.inner)) }
    }

    fn start(&self, buffer: CircularDataFrame) {
        tracing::info!("Starting stream {} for {}", self.inner.key, self.inner.target.url);
        let driver = StreamDriver::new(
            self.inner.target.url.clone(),
            buffer,
            self.inner.config.clone(),
            Arc::clone(&self.inner),
            self.inner.cancel.clone(),
        );
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = driver.run().await;
            inner.finish(outcome);
        });
    }

    /// Tears the stream down now, whatever its subscribers. They see the end of
    /// their channel and the cache entry is removed.
    pub fn close(&self) {
        {
            let mut state = self.inner.lock_state();
            match state.status {
                Status::Idle(_) => state.status = Status::Terminated(None),
                Status::Running => self.inner.begin_close(&mut state),
                Status::Closing | Status::Terminated(_) => return,
            }
        }
        self.inner.evict();
    }
}

/// # Subscription
///
/// Receives the stream's snapshots in order. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    stream: Option<Arc<StreamInner>>,
}

impl Subscription {
    /// Next snapshot or terminal error. `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.unsubscribe(self.id);
        }
    }
}
