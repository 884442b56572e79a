//! Sync session state.
//!
//! A session moves through a small state machine:
//!
//! ```text
//!   idle|success|error ──start──▶ syncing ──▶ success
//!                                  │  │
//!                                  │  └──▶ error
//!                                  ▼
//!                               conflict ──finalize──▶ success
//!                                  │
//!                                  └──▶ error (finalize rejected)
//!
//!   syncing|conflict ──cancel──▶ idle
//! ```
//!
//! [`SyncSession::transition`] enforces the edges; everything else on the
//! session is plain data.

use crate::{error::Result, SessionId, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_engine::{CompositeKey, ConflictSet, SyncResult};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

impl SessionStatus {
    /// Whether a session in this state blocks a new one from starting.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Syncing | SessionStatus::Conflict)
    }

    /// Whether the background work for this session is over.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionStatus::Syncing)
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Idle | Success | Error, Syncing)
                | (Syncing, Syncing | Success | Error | Conflict | Idle)
                | (Conflict, Success | Error | Idle)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Syncing => write!(f, "syncing"),
            SessionStatus::Success => write!(f, "success"),
            SessionStatus::Error => write!(f, "error"),
            SessionStatus::Conflict => write!(f, "conflict"),
        }
    }
}

/// A human-readable error recorded on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub message: String,
    /// The item being processed when the error occurred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<CompositeKey>,
    pub occurred_at: DateTime<Utc>,
}

impl SessionError {
    pub fn new(message: impl Into<String>, item: Option<CompositeKey>) -> Self {
        Self {
            message: message.into(),
            item,
            occurred_at: Utc::now(),
        }
    }
}

/// Returned by `start_sync`; names the session it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
}

/// One sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub id: SessionId,
    /// Operation id assigned by the remote once the sync has started
    pub remote_id: Option<String>,
    pub status: SessionStatus,
    /// Percentage, 0 to 100; never decreases while syncing
    pub progress: u8,
    pub total_items: u64,
    pub processed_items: u64,
    pub current_item: Option<CompositeKey>,
    pub errors: Vec<SessionError>,
    pub conflicts: ConflictSet,
    pub result: Option<SyncResult>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable copy of a session as handed to observers.
pub type SessionSnapshot = SyncSession;

impl SyncSession {
    /// A fresh session in `syncing`.
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            remote_id: None,
            status: SessionStatus::Syncing,
            progress: 0,
            total_items: 0,
            processed_items: 0,
            current_item: None,
            errors: Vec::new(),
            conflicts: ConflictSet::default(),
            result: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            started_at: self.started_at,
        }
    }

    /// Move to `next`, failing with [`SyncError::InvalidState`] on an
    /// illegal edge. The session is untouched on failure.
    pub fn transition(&mut self, next: SessionStatus, operation: &'static str) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(SyncError::InvalidState {
                operation,
                status: self.status,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Fail with [`SyncError::InvalidState`] unless the session is in
    /// `expected`.
    pub fn require(&self, expected: SessionStatus, operation: &'static str) -> Result<()> {
        if self.status != expected {
            return Err(SyncError::InvalidState {
                operation,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Record a poll tick. Progress and processed counts only move forward.
    pub fn record_progress(
        &mut self,
        progress: u8,
        processed_items: u64,
        total_items: u64,
        current_item: Option<CompositeKey>,
    ) {
        self.progress = self.progress.max(progress.min(100));
        self.processed_items = self.processed_items.max(processed_items);
        self.total_items = self.total_items.max(total_items);
        if current_item.is_some() {
            self.current_item = current_item;
        }
        self.touch();
    }

    /// Record an error against the current item.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors
            .push(SessionError::new(message, self.current_item.clone()));
        self.touch();
    }

    /// Cancel back to `idle`, discarding progress, conflicts and errors.
    pub fn reset(&mut self) -> Result<()> {
        self.transition(SessionStatus::Idle, "cancel")?;
        self.progress = 0;
        self.total_items = 0;
        self.processed_items = 0;
        self.current_item = None;
        self.errors.clear();
        self.conflicts = ConflictSet::default();
        self.result = None;
        Ok(())
    }

    /// Error messages, in the order they were recorded.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
