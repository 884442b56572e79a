//! Read-only reconciliation report.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tally_engine::ReconciliationReport;
use tally_session::ReportOptions;

use crate::error::Result;
use crate::AppState;

/// Create reconciliation routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/reconciliation", get(report_handler))
}

/// GET /reconciliation - Report from the remote, optionally for one category.
async fn report_handler(
    State(state): State<AppState>,
    Query(options): Query<ReportOptions>,
) -> Result<Json<ReconciliationReport>> {
    let report = state.manager.get_reconciliation_report(options).await?;
    Ok(Json(report))
}
