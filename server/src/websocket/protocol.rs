//! WebSocket message protocol for progress streams.
//!
//! Envelopes are JSON, tagged by a snake_case `type`; session payloads use
//! the same camelCase form as the HTTP API.

use serde::{Deserialize, Serialize};
use tally_session::SessionSnapshot;

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep-alive ping.
    Ping,

    /// Cancel the session this stream follows.
    Cancel,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A new state of the followed session.
    Progress { session: Box<SessionSnapshot> },

    /// Response to ping.
    Pong,

    /// A client message could not be handled.
    Error { message: String },
}

impl ServerMessage {
    pub fn progress(session: SessionSnapshot) -> Self {
        ServerMessage::Progress {
            session: Box::new(session),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Whether this is the last message of a stream.
    pub fn is_final(&self) -> bool {
        matches!(self, ServerMessage::Progress { session } if !session.status.is_active())
    }
}
