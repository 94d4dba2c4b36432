//! WebSocket push adapter
//!
//! One task per socket reads frames and feeds them to the relay engine in
//! arrival order; a writer task drains the connection's outbound channel onto
//! the socket. Text frames carry JSON envelopes. The liveness monitor's probes
//! go out as WebSocket pings and the pongs come back through `RelayEngine::pong`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;

use super::state::AppState;
use crate::connection::{ChannelConnection, Outbound};
use crate::engine::{PeerLink, RelayEngine};

/// How long the writer gets to flush after the reader is done
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /ws - Upgrade to a relay WebSocket.
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<RelayEngine>) {
    let (conn, outbound) = ChannelConnection::new(true);
    let mut link = PeerLink::new(Arc::new(conn));
    tracing::info!(conn = %link.id(), "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_frames(sender, outbound));
    let mut writer_done = false;

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => engine.handle_text(&mut link, &text).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => engine.handle_text(&mut link, text).await,
                    Err(_) => tracing::debug!(conn = %link.id(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Pong(_))) => engine.pong(&link).await,
                // Pings are answered by the WebSocket layer
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(conn = %link.id(), error = %e, "WebSocket read error");
                    break;
                }
            },
            // Writer ends when the relay closes this connection or the socket fails
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    engine.disconnect(&mut link).await;
    if !writer_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(conn = %link.id(), "WebSocket closed");
}

async fn write_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        let message = match frame {
            Outbound::Message(msg) => match msg.encode() {
                Ok(text) => Message::Text(text),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode outbound message");
                    continue;
                }
            },
            Outbound::Ping => Message::Ping(Vec::new()),
            Outbound::Close => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        };
        if sender.send(message).await.is_err() {
            break;
        }
    }
}
