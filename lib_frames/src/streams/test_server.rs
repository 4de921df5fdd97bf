//! Scripted websocket server for stream tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// One scripted action for an accepted connection.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Send(String),
    Wait(Duration),
    /// Sends a close frame and waits for the client's reply.
    Close(u16, &'static str),
    /// Drops the TCP connection without a close handshake.
    Drop,
    /// Keeps the connection open until the client goes away.
    Hold,
}

pub(crate) struct TestServer {
    pub url: String,
    accepted: Arc<AtomicUsize>,
}

impl TestServer {
    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Serves one script per incoming connection, in order. Once the scripts run out the
/// listener is closed and further connects are refused.
pub(crate) async fn spawn_server(sessions: Vec<Vec<Step>>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        let mut open = Vec::new();
        for steps in sessions {
            let Ok((tcp, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            let Ok(mut ws) = accept_async(tcp).await else { continue };

            // Held sessions keep running while the next connection is accepted.
            open.push(tokio::spawn(async move {
                for step in steps {
                    match step {
                        Step::Send(text) => {
                            if ws.send(Message::Text(text.into())).await.is_err() {
                                return;
                            }
                        }
                        Step::Wait(delay) => tokio::time::sleep(delay).await,
                        Step::Close(code, reason) => {
                            let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                            let _ = ws.close(Some(frame)).await;
                            while let Some(Ok(_)) = ws.next().await {}
                            return;
                        }
                        Step::Drop => return,
                        Step::Hold => {
                            while let Some(Ok(_)) = ws.next().await {}
                            return;
                        }
                    }
                }
            }));
        }
        drop(listener);
        for session in open {
            let _ = session.await;
        }
    });

    TestServer { url, accepted }
}

/// A URL nothing listens on.
pub(crate) async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    format!("ws://{}", listener.local_addr().unwrap())
}

/// Polls `condition` until it holds or two seconds pass.
pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
