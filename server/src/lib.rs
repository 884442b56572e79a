//! Tally Server - HTTP and WebSocket front end for property sync sessions.
//!
//! Exposes the session manager from `tally-session` over a small REST API,
//! streams session progress over WebSockets, and persists the local property
//! book in PostgreSQL.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod remote;
pub mod routes;
pub mod websocket;

use crate::websocket::{forward_progress, ConnectionManager};
use axum::Router;
use std::sync::Arc;
use tally_session::SyncManager;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: SyncManager,
    pub connections: Arc<ConnectionManager>,
}

impl AppState {
    /// Build the state and start forwarding session snapshots to progress
    /// streams. Must be called inside a Tokio runtime.
    pub fn new(manager: SyncManager) -> Self {
        let connections = ConnectionManager::new_shared();
        tokio::spawn(forward_progress(manager.subscribe(), connections.clone()));
        Self {
            manager,
            connections,
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
