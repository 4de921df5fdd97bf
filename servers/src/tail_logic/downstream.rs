use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::StreamExt;
use lib_frames::{data_frame_to_json, FrameError, LiveTarget};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::tail_logic::state::AppState;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Query string of `/tail`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailParams {
    pub url: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub ref_id: String,
    pub size: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tail", get(tail_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn run(port: u16, state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Downstream server listening on {}", addr);
    serve(listener, state, async move {
        shutdown.recv().await.ok();
        tracing::info!("Downstream server shutting down.");
    })
    .await
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn tail_handler(ws: WebSocketUpgrade, Query(params): Query<TailParams>, State(state): State<AppState>) -> Response {
    let size = params.size.unwrap_or(state.default_size);
    let target = LiveTarget::new(params.url, params.query, params.ref_id, size);

    if target.size == 0 {
        let e = FrameError::InvalidCapacity(0);
        tracing::warn!("Rejected tail request for {}: {}", target.url, e);
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    // The stream is resolved only once the upgrade succeeded.
    ws.on_upgrade(move |socket| handle_socket(socket, state, target))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, target: LiveTarget) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);

    let (stream, mut subscription) = match state.streams.subscribe(&target) {
        Ok(subscribed) => subscribed,
        Err(e) => {
            tracing::warn!("Client {} cannot tail {}: {}", client_id, target.url, e);
            let frame = CloseFrame { code: 1011, reason: e.to_string().into() };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };
    tracing::info!("Client {} connected to {}", client_id, stream.key());

    loop {
        tokio::select! {
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients only listen.
                Some(Ok(_)) => {}
            },
            event = subscription.recv() => match event {
                Some(Ok(frame)) => {
                    let text = match serde_json::to_string(&data_frame_to_json(&frame)) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Failed to encode frame for client {}: {}", client_id, e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break; // client disconnected
                    }
                }
                Some(Err(e)) => {
                    let frame = CloseFrame { code: 1011, reason: e.to_string().into() };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let frame = CloseFrame { code: 1000, reason: "stream completed".into() };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                }
            },
        }
    }

    tracing::info!("Client {} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use lib_frames::frames::json::data_frame_from_json_str;
    use lib_frames::{FieldValue, StreamsConfig};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{accept_async, connect_async};

    async fn spawn_relay() -> SocketAddr {
        spawn_relay_with_state().await.0
    }

    async fn spawn_relay_with_state() -> (SocketAddr, AppState) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(StreamsConfig { retry_delay_ms: 20, ..Default::default() }, 10);
        tokio::spawn(serve(listener, state.clone(), std::future::pending()));
        (addr, state)
    }

    /// Upstream that sends one tail message and then holds the connection.
    async fn spawn_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let message = r#"{"streams":[{"stream":{"job":"api","host":"a"},"values":[["1612900958123456789","hello"]]}]}"#;
            ws.send(WsMessage::Text(message.into())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });
        addr
    }

    #[tokio::test]
    async fn test_health() {
        let addr = spawn_relay().await;
        let mut tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
        tcp.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        tcp.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("OK"));
    }

    #[tokio::test]
    async fn test_relays_encoded_snapshots() {
        let upstream = spawn_upstream().await;
        let relay = spawn_relay().await;
        let url = format!(
            "ws://{}/tail?url=ws://{}&query=%7Bjob%3D%22api%22%7D&refId=A&size=5",
            relay, upstream
        );

        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out")
            .unwrap()
            .unwrap();
        let WsMessage::Text(text) = message else {
            panic!("expected a text frame, got {:?}", message);
        };

        let frame = data_frame_from_json_str(&text).unwrap();
        assert_eq!(frame.ref_id.as_deref(), Some("A"));
        assert_eq!(frame.length, 1);
        assert_eq!(frame.field("line").unwrap().values, vec![FieldValue::from("hello")]);
        let line_labels = frame.field("line").unwrap().labels.clone().unwrap();
        assert_eq!(line_labels.get("job").map(String::as_str), Some("api"));
    }

    #[tokio::test]
    async fn test_abandoned_upgrade_leaves_no_stream() {
        let (relay, state) = spawn_relay_with_state().await;
        let mut tcp = tokio::net::TcpStream::connect(relay).await.unwrap();
        tcp.write_all(
            b"GET /tail?url=ws://127.0.0.1:1&size=5 HTTP/1.1\r\n\
              Host: localhost\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();
        drop(tcp);

        let mut empty = false;
        for _ in 0..100 {
            if state.streams.is_empty() {
                empty = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // Give a late upgrade callback the chance to run, then check again.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(empty && state.streams.is_empty());
    }

    #[tokio::test]
    async fn test_zero_size_is_rejected() {
        let relay = spawn_relay().await;
        let url = format!("ws://{}/tail?url=ws://127.0.0.1:1&size=0", relay);
        assert!(connect_async(url.as_str()).await.is_err());
    }
}
