use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tether_core::frame::Frame;
use tether_core::ids::{DeviceId, SessionId};
use tether_engine::{report, Transport, TransportKind};
use tokio::sync::mpsc;

use crate::registry::SessionRegistry;

/// Drive one WebSocket as the stream transport of a session.
///
/// The socket ending only detaches the session; its state waits for the
/// next transport until the idle timeout.
pub async fn handle_ws_connection<S>(
    socket: WebSocket,
    registry: Arc<SessionRegistry<S>>,
    device_id: DeviceId,
    session_id: SessionId,
    has_tree: bool,
    queue: usize,
    heartbeat: Duration,
) where
    S: Clone + Send + Sync + 'static,
{
    let (transport, rx) = Transport::channel(TransportKind::Stream, queue);
    let transport_id = transport.id();
    let handle = match registry
        .attach(&device_id, &session_id, transport, has_tree)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            tracing::info!(%device_id, %session_id, error = %e, "WebSocket attach refused");
            let mut socket = socket;
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };
    tracing::info!(%device_id, %session_id, transport_id, "WebSocket attached");

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_frames(ws_tx, rx, heartbeat));

    let reader_handle = handle.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if let Err(e) = reader_handle.dispatch_text(text.as_str()).await {
                        report(reader_handle.scope(), &e, "websocket inbound");
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                // axum answers pings itself
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.detach(&session_id, transport_id, "socket closed").await;
    tracing::info!(%device_id, %session_id, transport_id, "WebSocket closed");
}

async fn write_frames<W>(mut ws_tx: W, mut rx: mpsc::Receiver<Frame>, heartbeat: Duration)
where
    W: futures::Sink<WsMessage> + Unpin,
{
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                // None: the session dropped this transport
                let Some(frame) = frame else { break };
                if ws_tx.send(WsMessage::Text(frame.to_json().into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                    break;
                }
                tracing::trace!("Sent ping");
            }
        }
    }
    let _ = ws_tx.send(WsMessage::Close(None)).await;
}
