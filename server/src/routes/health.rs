//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tally_session::SessionStatus;

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Status of the current sync session, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionStatus>,
    /// Open progress streams
    pub active_streams: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let session = state.manager.current().await.map(|s| s.status);
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session,
        active_streams: state.connections.connection_count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Tally Sync Server"
}
