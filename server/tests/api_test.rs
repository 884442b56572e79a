//! Integration tests for the HTTP API.
//!
//! The router runs in-process against a fake remote and an in-memory
//! property store; requests go through `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_engine::{
    Classification, CompositeKey, PartialRecord, ReportDetail, ResolutionEntry, SyncResult,
};
use tally_server::{app, AppState};
use tally_session::{
    MemoryStore, RemoteConflict, RemoteError, RemoteReport, RemoteState, RemoteStatus,
    RemoteSyncApi, ReportOptions, RetryPolicy, SessionConfig, SessionHandle, SessionStatus,
    SyncManager, SyncOptions,
};
use tower::ServiceExt;

/// A remote that replays queued statuses and accepts every resolution.
#[derive(Default)]
struct FakeRemote {
    statuses: Mutex<VecDeque<RemoteStatus>>,
    report: RemoteReport,
}

#[async_trait]
impl RemoteSyncApi for FakeRemote {
    async fn start(&self, _options: &SyncOptions) -> Result<String, RemoteError> {
        Ok("op-1".to_string())
    }

    async fn status(&self, _remote_id: &str) -> Result<RemoteStatus, RemoteError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RemoteStatus::running(50, 5, 10)))
    }

    async fn resolve(
        &self,
        _remote_id: &str,
        resolutions: &[ResolutionEntry],
    ) -> Result<SyncResult, RemoteError> {
        Ok(SyncResult {
            success: true,
            items_added: 0,
            items_updated: 0,
            items_removed: 0,
            conflicts_resolved: resolutions.len() as u64,
            errors: vec![],
            timestamp: chrono::Utc::now(),
        })
    }

    async fn reconciliation_report(
        &self,
        _options: &ReportOptions,
    ) -> Result<RemoteReport, RemoteError> {
        Ok(self.report.clone())
    }
}

fn partial(value: Value) -> PartialRecord {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

fn conflict(nsn: &str) -> RemoteConflict {
    RemoteConflict {
        key: CompositeKey::bulk(nsn),
        occurrence: 0,
        category: Some("weapons".into()),
        local_data: partial(json!({"nsn": nsn, "status": "FMC", "location": "Bay 1"})),
        remote_data: partial(json!({"nsn": nsn, "status": "NMC", "location": "Bay 2"})),
        conflict_fields: BTreeSet::from(["status".to_string(), "location".to_string()]),
    }
}

fn setup(remote: FakeRemote) -> (Router, SyncManager) {
    let config = SessionConfig::default()
        .with_poll_interval(Duration::from_millis(100))
        .with_retry(RetryPolicy::none())
        .with_poll_budget(Duration::from_secs(5));
    let manager = SyncManager::new(Arc::new(remote), Arc::new(MemoryStore::new()), config);
    let router = app(AppState::new(manager.clone()));
    (router, manager)
}

fn with_conflicts(nsns: &[&str]) -> FakeRemote {
    let status = RemoteStatus {
        conflicts: nsns.iter().map(|nsn| conflict(nsn)).collect(),
        ..RemoteStatus::finished(RemoteState::NeedsValidation)
    };
    FakeRemote {
        statuses: Mutex::new(VecDeque::from([status])),
        ..Default::default()
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

/// Start a sync over HTTP and wait for it to settle.
async fn start_and_settle(router: &Router, manager: &SyncManager) -> SessionHandle {
    let (status, body) = send(router, Method::POST, "/sync", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let handle: SessionHandle = serde_json::from_value(body).unwrap();
    manager.wait_until_settled(handle).await.unwrap();
    handle
}

// ============================================================================
// Health
// ============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_current_session() {
        let (router, manager) = setup(with_conflicts(&["A"]));

        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body.get("session").is_none());
        assert_eq!(body["activeStreams"], 0);

        start_and_settle(&router, &manager).await;
        let (_, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(body["session"], "conflict");
    }

    #[tokio::test]
    async fn root_names_the_server() {
        let (router, _) = setup(FakeRemote::default());
        let (status, body) = send(&router, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("Tally Sync Server".into()));
    }
}

// ============================================================================
// Session lifecycle
// ============================================================================

mod session_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn start_returns_handle_and_rejects_second_start() {
        let (router, _) = setup(FakeRemote::default());

        let (status, body) = send(&router, Method::POST, "/sync", Some(json!({"categories": ["weapons"]}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let handle: SessionHandle = serde_json::from_value(body).unwrap();

        let (status, body) = send(&router, Method::POST, "/sync", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already in progress"));

        let (status, body) = send(&router, Method::GET, &format!("/sync/{}", handle.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "syncing");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resets_to_idle() {
        let (router, _) = setup(FakeRemote::default());
        let (_, body) = send(&router, Method::POST, "/sync", None).await;
        let handle: SessionHandle = serde_json::from_value(body).unwrap();

        let (status, body) = send(&router, Method::DELETE, &format!("/sync/{}", handle.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");
        assert_eq!(body["progress"], 0);

        // Nothing left to cancel
        let (status, _) = send(&router, Method::DELETE, &format!("/sync/{}", handle.id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_and_malformed_session_ids() {
        let (router, _) = setup(FakeRemote::default());

        let (status, _) = send(&router, Method::GET, "/sync/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = uuid::Uuid::new_v4();
        let (status, _) = send(&router, Method::GET, &format!("/sync/{}", unknown), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&router, Method::GET, &format!("/sync/{}/progress", unknown), None).await;
        assert!(status.is_client_error());
    }
}

// ============================================================================
// Conflict resolution
// ============================================================================

mod resolution_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolve_each_then_finalize() {
        let (router, manager) = setup(with_conflicts(&["A", "B"]));
        let handle = start_and_settle(&router, &manager).await;
        let base = format!("/sync/{}", handle.id);

        let (status, body) = send(&router, Method::GET, &format!("{}/conflicts", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conflicts"].as_array().unwrap().len(), 2);
        assert_eq!(body["unresolved"], 2);

        let (status, body) = send(
            &router,
            Method::PUT,
            &format!("{}/conflicts/A", base),
            Some(json!({"resolution": "merge"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resolution"], "merge");
        assert_eq!(body["resolvedData"]["location"], "Bay 1");
        assert_eq!(body["resolvedData"]["status"], "FMC");

        // Finalizing with one conflict left is refused
        let (status, body) = send(&router, Method::POST, &format!("{}/finalize", base), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("1 conflict(s)"));

        let (status, _) = send(
            &router,
            Method::PUT,
            &format!("{}/conflicts/B", base),
            Some(json!({"resolution": "manual", "data": {"nsn": "B", "status": "PMC"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&router, Method::POST, &format!("{}/finalize", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["conflictsResolved"], 2);

        let (_, body) = send(&router, Method::GET, &base, None).await;
        assert_eq!(body["status"], "success");
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_all_and_bad_requests() {
        let (router, manager) = setup(with_conflicts(&["A", "B"]));
        let handle = start_and_settle(&router, &manager).await;
        let base = format!("/sync/{}", handle.id);

        // Manual without data
        let (status, _) = send(
            &router,
            Method::PUT,
            &format!("{}/conflicts/A", base),
            Some(json!({"resolution": "manual"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &router,
            Method::PUT,
            &format!("{}/conflicts/ZZZ", base),
            Some(json!({"resolution": "local"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("{}/conflicts/resolve-all", base),
            Some(json!({"resolution": "remote"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["written"], 2);
        assert_eq!(body["fullyResolved"], true);

        let (status, _) = send(&router, Method::POST, &format!("{}/finalize", base), None).await;
        assert_eq!(status, StatusCode::OK);

        // The session has settled; resolving again is a state error
        let (status, _) = send(
            &router,
            Method::POST,
            &format!("{}/conflicts/resolve-all", base),
            Some(json!({"resolution": "remote", "force": true})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}

// ============================================================================
// Reconciliation report
// ============================================================================

mod report_tests {
    use super::*;

    fn detail(nsn: &str, category: &str, classification: Classification) -> ReportDetail {
        ReportDetail {
            key: CompositeKey::bulk(nsn),
            occurrence: 0,
            category: category.into(),
            classification,
            conflict_fields: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn report_filters_by_category() {
        let details = vec![
            detail("A", "weapons", Classification::Matched),
            detail("B", "weapons", Classification::LocalOnly),
            detail("C", "vehicles", Classification::RemoteOnly),
        ];
        let remote = FakeRemote {
            report: RemoteReport {
                details,
                records: None,
            },
            ..Default::default()
        };
        let (router, _) = setup(remote);

        let (status, body) = send(&router, Method::GET, "/reconciliation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["details"].as_array().unwrap().len(), 3);

        let (status, body) = send(&router, Method::GET, "/reconciliation?category=weapons", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn report_with_records_uses_the_local_store() {
        let remote = FakeRemote {
            report: RemoteReport {
                details: vec![detail("A", "weapons", Classification::Matched)],
                records: Some(vec![tally_engine::PropertyRecord::new("Z").with_category("comms")]),
            },
            ..Default::default()
        };
        let (router, _) = setup(remote);

        // The local store is empty, so the remote record is remote-only
        let (status, body) = send(&router, Method::GET, "/reconciliation?includeRecords=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["totalItems"], 1);
        assert_eq!(body["summary"]["remoteOnlyItems"], 1);
        assert_eq!(body["details"][0]["classification"], "remoteOnly");
    }
}

#[test]
fn session_status_wire_names() {
    assert_eq!(serde_json::to_value(SessionStatus::Conflict).unwrap(), json!("conflict"));
}
