//! WebSocket handler for session progress streams.
//!
//! A client follows one session: it gets the current snapshot right away,
//! then every change until the session settles, after which the server
//! closes the stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tally_session::{SessionId, SyncManager};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established progress WebSocket.
///
/// This function:
/// 1. Registers the connection for the session's snapshots
/// 2. Sends the current snapshot
/// 3. Spawns a task forwarding outgoing messages, closing after the last one
/// 4. Processes incoming messages until the client leaves
pub async fn handle_progress_socket(
    socket: WebSocket,
    manager: SyncManager,
    conn_manager: Arc<ConnectionManager>,
    session_id: SessionId,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Register before reading the snapshot so no change is missed
    let conn_id = conn_manager.register(session_id, tx);
    match manager.snapshot(session_id).await {
        Ok(snapshot) => {
            conn_manager.send_to(&conn_id, ServerMessage::progress(snapshot));
        }
        Err(e) => {
            conn_manager.send_to(&conn_id, ServerMessage::error(e.to_string()));
        }
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::warn!("Failed to send WebSocket message: {}", e);
                break;
            }
            if msg.is_final() {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &manager, session_id).await;
                if let Some(response) = response {
                    conn_manager.send_to(&conn_id, response);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        session_id = %session_id,
        active_connections = conn_manager.connection_count(),
        "Progress stream closed"
    );
}

/// Process a client message, returning a direct reply if there is one.
///
/// A successful cancel has no direct reply: the resulting `idle` snapshot
/// reaches the client through the progress stream.
async fn process_message(
    text: &str,
    manager: &SyncManager,
    session_id: SessionId,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => return Some(ServerMessage::error(format!("Invalid message format: {}", e))),
    };

    match client_msg {
        ClientMessage::Ping => Some(ServerMessage::Pong),
        ClientMessage::Cancel => match manager.cancel_sync(session_id).await {
            Ok(_) => None,
            Err(e) => Some(ServerMessage::error(e.to_string())),
        },
    }
}
