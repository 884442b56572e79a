//! WebSocket connection manager.
//!
//! Tracks progress-stream connections by the session they follow and fans
//! session snapshots out to them.

use std::sync::Arc;

use dashmap::DashMap;
use tally_session::{SessionId, SessionSnapshot};
use tokio::sync::{broadcast, mpsc};

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Session this connection follows
    pub session_id: SessionId,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active progress-stream connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Index of connections by session for fan-out.
    by_session: DashMap<SessionId, Vec<String>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, session_id: SessionId, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                session_id,
                sender,
            },
        );
        self.by_session
            .entry(session_id)
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, session_id = %session_id, "Progress stream registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_session.get_mut(&conn.session_id) {
                conn_ids.retain(|id| id != conn_id);
                // Clean up empty entries
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_session.remove(&conn.session_id);
                }
            }

            tracing::info!(conn_id = %conn_id, session_id = %conn.session_id, "Progress stream unregistered");
        }
    }

    /// Send a message to every connection following `session_id`.
    ///
    /// Returns the number of connections that received the message.
    pub fn send_to_session(&self, session_id: SessionId, message: &ServerMessage) -> usize {
        let Some(conn_ids) = self.by_session.get(&session_id).map(|ids| ids.value().clone()) else {
            return 0;
        };

        conn_ids
            .iter()
            .filter(|id| self.send_to(id, message.clone()))
            .count()
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of sessions being followed.
    pub fn session_count(&self) -> usize {
        self.by_session.len()
    }
}

/// Forward every published snapshot to the connections following its
/// session. Runs until the snapshot channel closes.
pub async fn forward_progress(
    mut snapshots: broadcast::Receiver<SessionSnapshot>,
    connections: Arc<ConnectionManager>,
) {
    loop {
        match snapshots.recv().await {
            Ok(snapshot) => {
                let session_id = snapshot.id;
                let sent = connections.send_to_session(session_id, &ServerMessage::progress(snapshot));
                if sent > 0 {
                    tracing::debug!(session_id = %session_id, recipients = sent, "Forwarded progress");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Progress forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
