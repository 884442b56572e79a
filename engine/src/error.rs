//! Error types for the Tally engine.

use crate::ConflictKey;
use thiserror::Error;

/// All possible errors from the Tally engine.
///
/// Every variant is a caller-facing validation failure: none of them imply
/// that data was lost or partially written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Conflict resolution errors
    #[error("unknown conflict: {0}")]
    UnknownConflict(ConflictKey),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("incomplete resolution: {unresolved} conflict(s) still unresolved")]
    IncompleteResolution { unresolved: usize },

    // Input errors
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
