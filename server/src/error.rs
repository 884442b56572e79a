//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tally_engine::Error as EngineError;
use tally_session::SyncError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Sync(err.into())
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Sync(err) => match err {
                SyncError::AlreadyInProgress | SyncError::InvalidState { .. } => StatusCode::CONFLICT,
                SyncError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                SyncError::Network(_) | SyncError::RemoteFatal(_) => StatusCode::BAD_GATEWAY,
                SyncError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                SyncError::Engine(engine) => match engine {
                    EngineError::IncompleteResolution { .. } => StatusCode::CONFLICT,
                    EngineError::UnknownConflict(_) => StatusCode::NOT_FOUND,
                    EngineError::InvalidResolution(_)
                    | EngineError::InvalidKey(_)
                    | EngineError::InvalidRecord(_) => StatusCode::UNPROCESSABLE_ENTITY,
                },
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Sync(SyncError::Store(msg)) => {
                tracing::error!("Store error: {}", msg);
                ("Store error".to_string(), None)
            }
            AppError::Sync(err @ (SyncError::Network(_) | SyncError::RemoteFatal(_))) => {
                tracing::warn!("Remote error: {}", err);
                ("Remote system error".to_string(), Some(err.to_string()))
            }
            AppError::Sync(SyncError::Engine(EngineError::IncompleteResolution { unresolved })) => (
                self.to_string(),
                Some(format!("{} conflict(s) need a resolution before finalize", unresolved)),
            ),
            other => (other.to_string(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
