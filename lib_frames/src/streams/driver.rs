//! # Reconnecting Stream Driver
//!
//! Owns the websocket connection and the circular buffer of one live stream. The
//! driver moves through four states:
//!
//! - **Connecting**: opening the websocket.
//! - **Active**: merging every inbound message into the buffer and publishing a
//!   snapshot.
//! - **Backoff**: waiting before the next connect after an abnormal closure.
//! - **Terminated**: normal completion, a fatal error, or cancellation.
//!
//! Abnormal closures (the peer vanished without a close handshake, or the
//! connect itself failed) are retried with the configured delay. A close frame with
//! an error code ends the stream with [`StreamError::Closed`]. Retrying never
//! resends a request; the buffer keeps its rows across reconnects.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::live::StreamInner;
use super::tail::TailMessage;
use super::StreamError;
use crate::configs::StreamsConfig;
use crate::frames::CircularDataFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How the driver ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Completed,
    Cancelled,
    Failed(StreamError),
}

/// What a closed or failed connection means for the driver.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Disconnect {
    /// Clean close: the stream is finished.
    Completed,
    /// The connection dropped; reconnect after the backoff delay.
    Abnormal(String),
    Fatal(StreamError),
}

enum DriverState {
    Connecting,
    Active(Box<WsStream>),
    Backoff,
    Terminated(Outcome),
}

/// Classifies a close frame sent by the server.
pub(crate) fn classify_close(frame: Option<&CloseFrame>) -> Disconnect {
    let Some(frame) = frame else {
        return Disconnect::Completed;
    };
    match frame.code {
        CloseCode::Normal | CloseCode::Away | CloseCode::Status => Disconnect::Completed,
        CloseCode::Abnormal => Disconnect::Abnormal(format!("close code 1006: {}", &*frame.reason)),
        code => Disconnect::Fatal(StreamError::Closed { code: u16::from(code), reason: (*frame.reason).to_owned() }),
    }
}

/// Classifies an error read from an open connection.
pub(crate) fn classify_error(err: &WsError) -> Disconnect {
    match err {
        // The close handshake already finished.
        WsError::ConnectionClosed | WsError::AlreadyClosed => Disconnect::Completed,
        WsError::Io(_) | WsError::Protocol(_) => Disconnect::Abnormal(err.to_string()),
        other => Disconnect::Fatal(StreamError::Transport(other.to_string())),
    }
}

/// Classifies a failed connect. Only an unusable URL is fatal; refused connections,
/// TLS failures and rejected handshakes are retried.
pub(crate) fn classify_connect_error(url: &str, err: &WsError) -> Disconnect {
    match err {
        WsError::Url(_) | WsError::HttpFormat(_) => {
            Disconnect::Fatal(StreamError::InvalidEndpoint { url: url.to_string(), reason: err.to_string() })
        }
        other => Disconnect::Abnormal(other.to_string()),
    }
}

pub(crate) struct StreamDriver {
    url: String,
    buffer: CircularDataFrame,
    config: StreamsConfig,
    stream: Arc<StreamInner>,
    cancel: CancellationToken,
}

impl StreamDriver {
    pub(crate) fn new(
        url: String,
        buffer: CircularDataFrame,
        config: StreamsConfig,
        stream: Arc<StreamInner>,
        cancel: CancellationToken,
    ) -> Self {
        Self { url, buffer, config, stream, cancel }
    }

    /// Runs until the stream completes, fails or is cancelled.
    pub(crate) async fn run(mut self) -> Outcome {
        let mut state = DriverState::Connecting;
        let mut failures: u32 = 0;

        loop {
            state = match state {
                DriverState::Connecting => {
                    let next = self.connect().await;
                    if matches!(next, DriverState::Active(_)) {
                        failures = 0;
                    }
                    next
                }
                DriverState::Active(ws) => self.pump(*ws).await,
                DriverState::Backoff => {
                    failures += 1;
                    self.backoff(failures).await
                }
                DriverState::Terminated(outcome) => return outcome,
            };
        }
    }

    async fn connect(&self) -> DriverState {
        tracing::info!("Connecting to {}", self.url);
        tokio::select! {
            _ = self.cancel.cancelled() => DriverState::Terminated(Outcome::Cancelled),
            result = connect_async(self.url.as_str()) => match result {
                Ok((ws, _)) => {
                    tracing::info!("Connected to {}", self.url);
                    DriverState::Active(Box::new(ws))
                }
                Err(e) => match classify_connect_error(&self.url, &e) {
                    Disconnect::Fatal(err) => {
                        tracing::error!("Cannot connect to {}: {}", self.url, err);
                        DriverState::Terminated(Outcome::Failed(err))
                    }
                    _ => {
                        tracing::warn!("Failed to connect to {}: {}", self.url, e);
                        DriverState::Backoff
                    }
                },
            },
        }
    }

    async fn backoff(&self, failures: u32) -> DriverState {
        if let Some(max) = self.config.max_reconnect_attempts {
            if failures > max {
                tracing::error!("Giving up on {} after {} reconnect attempts", self.url, max);
                return DriverState::Terminated(Outcome::Failed(StreamError::RetriesExhausted {
                    url: self.url.clone(),
                    attempts: max,
                }));
            }
        }

        let delay = self.config.retry_delay(failures);
        tracing::warn!("Reconnecting to {} in {}ms (attempt {})", self.url, delay.as_millis(), failures);
        tokio::select! {
            _ = self.cancel.cancelled() => DriverState::Terminated(Outcome::Cancelled),
            _ = tokio::time::sleep(delay) => DriverState::Connecting,
        }
    }

    async fn pump(&mut self, mut ws: WsStream) -> DriverState {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Err(e) = ws.close(None).await {
                        tracing::debug!("Close handshake with {} failed: {}", self.url, e);
                    }
                    return DriverState::Terminated(Outcome::Cancelled);
                }
                msg = ws.next() => {
                    let disconnect = match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.on_message(&text);
                            continue;
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            match std::str::from_utf8(&bytes) {
                                Ok(text) => self.on_message(text),
                                Err(e) => tracing::warn!("Skipping non UTF-8 binary message from {}: {}", self.url, e),
                            }
                            continue;
                        }
                        Some(Ok(WsMessage::Close(frame))) => classify_close(frame.as_ref()),
                        // Ping/pong are answered by tungstenite.
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => classify_error(&e),
                        None => Disconnect::Abnormal("connection ended without a close frame".to_string()),
                    };

                    return match disconnect {
                        Disconnect::Completed => {
                            tracing::info!("Stream {} closed normally", self.url);
                            DriverState::Terminated(Outcome::Completed)
                        }
                        Disconnect::Abnormal(reason) => {
                            tracing::warn!("Stream {} dropped: {}", self.url, reason);
                            DriverState::Backoff
                        }
                        Disconnect::Fatal(err) => {
                            tracing::error!("Stream {} failed: {}", self.url, err);
                            DriverState::Terminated(Outcome::Failed(err))
                        }
                    };
                }
            }
        }
    }

    /// Merges one message into the buffer and publishes the new snapshot. Malformed
    /// messages are logged and skipped.
    fn on_message(&mut self, text: &str) {
        match TailMessage::parse(text).and_then(|message| message.append_to(&mut self.buffer)) {
            Ok(rows) => {
                tracing::debug!("Appended {} rows from {}", rows, self.url);
                self.stream.publish(Arc::new(self.buffer.snapshot()));
            }
            Err(e) => tracing::warn!("Skipping malformed message from {}: {}", self.url, e),
        }
    }
}
