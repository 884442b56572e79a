//! Sync session handlers - thin adapters over the session manager.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tally_engine::{ConflictKey, ConflictRecord, PartialRecord, ResolutionKind, SyncResult};
use tally_session::{SessionHandle, SessionId, SyncManager, SyncOptions};

/// Request body for resolving one conflict.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub resolution: ResolutionKind,
    /// Required for `manual`
    #[serde(default)]
    pub data: Option<PartialRecord>,
}

/// Request body for resolving every conflict with one strategy.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveAllRequest {
    pub resolution: ResolutionKind,
    /// Overwrite conflicts that already have a resolution
    #[serde(default)]
    pub force: bool,
}

/// Response for bulk resolution.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveAllResponse {
    /// Conflicts written by this request
    pub written: usize,
    pub fully_resolved: bool,
}

/// Response listing a session's conflicts.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictsResponse {
    pub conflicts: Vec<ConflictRecord>,
    pub unresolved: usize,
}

/// Parse a session id path segment.
pub fn parse_session_id(raw: &str) -> Result<SessionId> {
    SessionId::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid session id: {}", raw)))
}

/// Parse a conflict key path segment (`NSN`, `NSN:SERIAL`, optional `~N`).
pub fn parse_conflict_key(raw: &str) -> Result<ConflictKey> {
    Ok(ConflictKey::from_str(raw)?)
}

/// Start a sync session.
pub async fn handle_start(manager: &SyncManager, options: SyncOptions) -> Result<SessionHandle> {
    Ok(manager.start_sync(options).await?)
}

/// List a session's conflicts.
pub async fn handle_conflicts(manager: &SyncManager, id: SessionId) -> Result<ConflictsResponse> {
    let conflicts = manager.get_conflicts(id).await?;
    let unresolved = conflicts.iter().filter(|c| !c.is_resolved()).count();
    Ok(ConflictsResponse {
        conflicts,
        unresolved,
    })
}

/// Resolve one conflict.
pub async fn handle_resolve(
    manager: &SyncManager,
    id: SessionId,
    key: &ConflictKey,
    request: ResolveRequest,
) -> Result<ConflictRecord> {
    Ok(manager
        .set_resolution(id, key, request.resolution, request.data)
        .await?)
}

/// Resolve every conflict with one strategy.
pub async fn handle_resolve_all(
    manager: &SyncManager,
    id: SessionId,
    request: ResolveAllRequest,
) -> Result<ResolveAllResponse> {
    let written = manager
        .set_resolution_for_all(id, request.resolution, request.force)
        .await?;
    let fully_resolved = manager.is_fully_resolved(id).await?;

    tracing::info!(session_id = %id, resolution = %request.resolution, written, "Bulk resolution");
    Ok(ResolveAllResponse {
        written,
        fully_resolved,
    })
}

/// Commit a fully resolved session.
pub async fn handle_finalize(manager: &SyncManager, id: SessionId) -> Result<SyncResult> {
    Ok(manager.finalize(id).await?)
}
