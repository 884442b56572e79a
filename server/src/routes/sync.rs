//! Sync session routes.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use tally_engine::{ConflictRecord, SyncResult};
use tally_session::{SessionHandle, SessionSnapshot, SyncOptions};

use crate::error::Result;
use crate::handlers::{
    handle_conflicts, handle_finalize, handle_progress_socket, handle_resolve,
    handle_resolve_all, handle_start, parse_conflict_key, parse_session_id, ConflictsResponse,
    ResolveAllRequest, ResolveAllResponse, ResolveRequest,
};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(start_handler))
        .route("/sync/{id}", get(snapshot_handler).delete(cancel_handler))
        .route("/sync/{id}/progress", get(progress_handler))
        .route("/sync/{id}/conflicts", get(conflicts_handler))
        .route("/sync/{id}/conflicts/resolve-all", post(resolve_all_handler))
        .route("/sync/{id}/conflicts/{key}", put(resolve_handler))
        .route("/sync/{id}/finalize", post(finalize_handler))
}

/// POST /sync - Start a sync session.
///
/// The body is optional; an empty body starts a full sync.
async fn start_handler(
    State(state): State<AppState>,
    options: Option<Json<SyncOptions>>,
) -> Result<(StatusCode, Json<SessionHandle>)> {
    let options = options.map(|Json(o)| o).unwrap_or_default();
    let handle = handle_start(&state.manager, options).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// GET /sync/{id} - Current session snapshot.
async fn snapshot_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>> {
    let id = parse_session_id(&id)?;
    Ok(Json(state.manager.snapshot(id).await?))
}

/// DELETE /sync/{id} - Cancel an active session.
async fn cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>> {
    let id = parse_session_id(&id)?;
    Ok(Json(state.manager.cancel_sync(id).await?))
}

/// GET /sync/{id}/progress - WebSocket stream of session snapshots.
async fn progress_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let id = parse_session_id(&id)?;
    // Refuse the upgrade for unknown sessions
    state.manager.snapshot(id).await?;

    tracing::info!(session_id = %id, "Progress stream upgrade");
    Ok(ws.on_upgrade(move |socket| {
        handle_progress_socket(socket, state.manager, state.connections, id)
    }))
}

/// GET /sync/{id}/conflicts - Conflicts awaiting resolution.
async fn conflicts_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConflictsResponse>> {
    let id = parse_session_id(&id)?;
    Ok(Json(handle_conflicts(&state.manager, id).await?))
}

/// PUT /sync/{id}/conflicts/{key} - Resolve one conflict.
async fn resolve_handler(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ConflictRecord>> {
    let id = parse_session_id(&id)?;
    let key = parse_conflict_key(&key)?;
    Ok(Json(handle_resolve(&state.manager, id, &key, request).await?))
}

/// POST /sync/{id}/conflicts/resolve-all - Resolve every conflict at once.
async fn resolve_all_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveAllRequest>,
) -> Result<Json<ResolveAllResponse>> {
    let id = parse_session_id(&id)?;
    Ok(Json(handle_resolve_all(&state.manager, id, request).await?))
}

/// POST /sync/{id}/finalize - Commit the resolved session.
async fn finalize_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncResult>> {
    let id = parse_session_id(&id)?;
    Ok(Json(handle_finalize(&state.manager, id).await?))
}
