//! WebSocket transport
//!
//! Each socket is split into a reader loop and a writer task. Outgoing
//! messages go through a bounded channel so run tasks can send without
//! touching the socket.

use super::AppState;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::Connection;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound queue depth per connection
const OUTBOUND_CAPACITY: usize = 256;

/// `GET /ws`
pub(super) async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let connection = state.sessions.register(tx).await;
    let id = connection.id();
    tracing::info!(connection = %id, "Client connected");

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    connection.send(ServerMessage::connected()).await;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => on_message(&state, &connection, &text).await,
            Ok(Message::Binary(_)) => {
                connection
                    .send(ServerMessage::error_with_details(
                        "Invalid message",
                        "binary frames are not supported",
                    ))
                    .await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(connection = %id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.sessions.remove(id).await;
    send_task.abort();
    state
        .dispatcher
        .connection_closed(&connection, state.kill_on_disconnect)
        .await;
    tracing::info!(connection = %id, "Client disconnected");
}

/// Decode one text frame and hand it to the dispatcher.
///
/// A frame that does not decode is answered with `script-error`; the
/// connection stays open.
async fn on_message(state: &AppState, connection: &Arc<Connection>, raw: &str) {
    match serde_json::from_str::<ClientMessage>(raw) {
        Ok(message) => state.dispatcher.handle(connection.clone(), message).await,
        Err(e) => {
            tracing::warn!(connection = %connection.id(), error = %e, "Failed to parse client message");
            connection
                .send(ServerMessage::error_with_details("Invalid message", e.to_string()))
                .await;
        }
    }
}
