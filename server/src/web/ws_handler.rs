use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::engine::events::{ClientFrame, ServerFrame};
use crate::engine::user_session::ConnectionHandle;

use super::app_state::AppState;

/// Server sends a WebSocket ping this often.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A connection that shows no inbound traffic (not even pongs) for this long is dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// How long the writer may keep flushing queued frames after the reader has finished.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /ws — upgrade to a chat connection. Authentication happens in the `join` frame.
pub async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::new(state.outbound_queue);
    let session_id = handle.id;

    let mut writer = tokio::spawn(write_loop(sink, rx));

    debug!(%session_id, "websocket connected");

    loop {
        let next = tokio::select! {
            _ = handle.closed() => {
                info!(%session_id, "connection closed by server");
                break;
            }
            next = timeout(IDLE_TIMEOUT, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                warn!(%session_id, "idle timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(%session_id, error = %e, "websocket receive error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(%session_id, error = %e, "unparseable frame");
                        handle.send(ServerFrame::error("Invalid frame"));
                        continue;
                    }
                };

                if let Err(e) = state.engine.handle_frame(&handle, frame).await {
                    warn!(%session_id, error = %e, "frame rejected");
                    handle.send(ServerFrame::error(e.client_message()));
                    if e.is_terminal() {
                        break;
                    }
                }
            }
            Message::Binary(_) => {
                handle.send(ServerFrame::error("Binary frames are not supported"));
            }
            Message::Close(frame) => {
                debug!(%session_id, reason = ?frame, "client initiated close");
                break;
            }
            // Pings are answered by axum; pongs only need to reset the idle timer.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.engine.disconnect(session_id).await;

    // Dropping the last sender lets the writer flush what is queued, then close.
    drop(handle);
    if timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Owns the socket sink: forwards queued frames as JSON text and sends keepalive pings.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<ServerFrame>) {
    let mut ping = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "failed to serialize frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}
