//! Error types for sync sessions.

use crate::{remote::RemoteError, store::StoreError, SessionId, SessionStatus};
use thiserror::Error;

/// All possible errors from the session manager.
///
/// Only [`SyncError::Network`] and [`SyncError::RemoteFatal`] ever change a
/// session's state; every other variant is a validation failure returned to
/// the caller with the session left untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("a sync session is already in progress")]
    AlreadyInProgress,

    #[error("network error: {0}")]
    Network(String),

    #[error("remote error: {0}")]
    RemoteFatal(String),

    #[error("sync session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("cannot {operation} while the session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },

    #[error("sync session was cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Engine(#[from] tally_engine::Error),
}

impl SyncError {
    /// Whether this error moves a session to `error`.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::RemoteFatal(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transient(msg) => SyncError::Network(msg),
            RemoteError::Fatal(msg) => SyncError::RemoteFatal(msg),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Store(err.to_string())
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SyncError>;
