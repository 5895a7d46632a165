use std::{borrow::Cow, sync::Arc};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    message::ClientId,
    registry::{ConnectionId, ConnectionRegistry},
};

enum SessionEnd {
    /// Close frame or end of stream.
    Disconnected,
    Failed(axum::Error),
}

/// Drives one admitted websocket until it disconnects.
///
/// The registry holds the only sender for the connection's outbound queue, so
/// once the connection is unregistered (here, by a failed broadcast, or by a
/// shutdown drain) the writer task runs dry and closes the socket.
pub async fn run(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    client_id: ClientId,
    email: String,
) {
    let (sink, mut stream) = socket.split();
    let (connection, outbound) = registry.open(client_id);
    let conn_id = connection.id();

    let writer = tokio::spawn(write_outbound(sink, outbound, conn_id));
    registry.register(connection).await;
    info!(conn_id, client_id, %email, "client joined");

    let end = read_inbound(&mut stream, &registry, client_id, conn_id).await;
    registry.unregister(conn_id).await;

    match end {
        SessionEnd::Disconnected => info!(conn_id, client_id, "client left"),
        SessionEnd::Failed(err) => warn!(conn_id, client_id, error = ?err, "connection failed"),
    }
    // The peer is gone either way; the room hears about it once.
    registry.announce_departure(client_id).await;

    if let Err(err) = writer.await {
        warn!(conn_id, error = ?err, "writer task panicked");
    }
}

/// Closes a socket that never presented a token.
pub async fn reject_missing_token(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Borrowed("Missing token"),
    };
    if let Err(err) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = ?err, "failed to send policy close frame");
    }
}

async fn read_inbound(
    stream: &mut SplitStream<WebSocket>,
    registry: &ConnectionRegistry,
    client_id: ClientId,
    conn_id: ConnectionId,
) -> SessionEnd {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                registry.broadcast(&text, client_id).await;
            }
            Ok(Message::Binary(bytes)) => {
                debug!(conn_id, len = bytes.len(), "ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                debug!(conn_id, ?frame, "client sent close");
                return SessionEnd::Disconnected;
            }
            Err(err) => return SessionEnd::Failed(err),
        }
    }
    SessionEnd::Disconnected
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    conn_id: ConnectionId,
) {
    while let Some(text) = outbound.recv().await {
        if let Err(err) = sink.send(Message::Text(text)).await {
            debug!(conn_id, error = ?err, "failed to write frame");
            return;
        }
    }
    // Queue closed: the connection was unregistered.
    let _ = sink.close().await;
}
