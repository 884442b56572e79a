//! Single-flight sync session manager.
//!
//! [`SyncManager`] owns at most one session at a time. Starting a sync spawns
//! a background task that drives the remote operation (start, poll until
//! terminal, reconcile) and moves the session through its state machine.
//! Resolver calls and finalize are serialized with that task through one
//! mutex; a cancelled session's late results are discarded by checking the
//! session id and cancellation token before every write.

use crate::{
    config::SessionConfig,
    error::Result,
    progress::{ProgressHub, Subscription},
    remote::{RemoteConflict, RemoteState, RemoteStatus, RemoteSyncApi, ReportOptions, SyncOptions},
    retry::retry,
    session::{SessionHandle, SessionSnapshot, SessionStatus, SyncSession},
    store::{PropertyStore, StoreWrite},
    SessionId, SyncError,
};
use chrono::Utc;
use std::sync::Arc;
use tally_engine::{
    ChangeCounts, ConflictKey, ConflictRecord, ConflictSet, PartialRecord, PropertyRecord,
    ReconciliationReport, Reconciler, ResolutionKind, SyncResult,
};
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drives sync sessions against a remote system of record.
///
/// Cloning is cheap; clones share the same session slot.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

struct Inner {
    remote: Arc<dyn RemoteSyncApi>,
    store: Arc<dyn PropertyStore>,
    config: SessionConfig,
    slot: Mutex<Option<Active>>,
    progress: ProgressHub,
    /// Parent of every session token; cancelled on shutdown
    shutdown: CancellationToken,
}

/// The current session plus what its commit will need.
struct Active {
    session: SyncSession,
    token: CancellationToken,
    pending: PendingCommit,
}

/// Counts and records gathered while syncing, applied on commit.
#[derive(Debug, Default)]
struct PendingCommit {
    baseline: ChangeCounts,
    /// Remote-only records found by local reconciliation
    remote_only: Vec<PropertyRecord>,
}

impl SyncManager {
    pub fn new(
        remote: Arc<dyn RemoteSyncApi>,
        store: Arc<dyn PropertyStore>,
        config: SessionConfig,
    ) -> Self {
        let progress = ProgressHub::new(config.progress_capacity);
        Self {
            inner: Arc::new(Inner {
                remote,
                store,
                config,
                slot: Mutex::new(None),
                progress,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Start a sync.
    ///
    /// Returns immediately; the remote operation runs in the background.
    /// Fails with [`SyncError::AlreadyInProgress`] while another session is
    /// `syncing` or `conflict`, leaving that session untouched. A previous
    /// `success` or `error` session is replaced.
    pub async fn start_sync(&self, options: SyncOptions) -> Result<SessionHandle> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut slot = self.inner.slot.lock().await;
        if let Some(active) = slot.as_ref() {
            if active.session.status.is_active() {
                tracing::warn!(
                    session_id = %active.session.id,
                    status = %active.session.status,
                    "Rejected start: a sync session is already in progress"
                );
                return Err(SyncError::AlreadyInProgress);
            }
        }

        let session = SyncSession::start();
        let handle = session.handle();
        let token = self.inner.shutdown.child_token();

        tracing::info!(session_id = %handle.id, categories = ?options.categories, "Sync session started");
        self.inner.progress.publish(session.clone());
        *slot = Some(Active {
            session,
            token: token.clone(),
            pending: PendingCommit::default(),
        });
        drop(slot);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run(handle.id, token, options).await;
        });

        Ok(handle)
    }

    /// Cancel the session, returning it to `idle`.
    ///
    /// Legal from `syncing` and `conflict`. Progress, conflicts and errors
    /// are discarded and no error is recorded.
    pub async fn cancel_sync(&self, id: SessionId) -> Result<SessionSnapshot> {
        let mut slot = self.inner.slot.lock().await;
        let active = find(&mut slot, id)?;

        active.session.reset()?;
        active.token.cancel();
        active.pending = PendingCommit::default();

        tracing::info!(session_id = %id, "Sync session cancelled");
        let snapshot = active.session.clone();
        self.inner.progress.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// The current state of a session.
    pub async fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot> {
        let mut slot = self.inner.slot.lock().await;
        Ok(find(&mut slot, id)?.session.clone())
    }

    /// The most recent session, if any.
    pub async fn current(&self) -> Option<SessionSnapshot> {
        self.inner
            .slot
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Receive every published snapshot, for all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.inner.progress.subscribe()
    }

    /// Deliver the session's snapshots to `callback` until it settles or
    /// the returned [`Subscription`] is dropped.
    pub fn on_progress<F>(&self, handle: SessionHandle, callback: F) -> Subscription
    where
        F: Fn(&SessionSnapshot) + Send + 'static,
    {
        Subscription::spawn(self.inner.progress.subscribe(), handle, callback)
    }

    /// Wait until the session leaves `syncing`.
    ///
    /// Fails with [`SyncError::SessionNotFound`] if another session replaces
    /// it first.
    pub async fn wait_until_settled(&self, handle: SessionHandle) -> Result<SessionSnapshot> {
        let mut latest = self.inner.progress.watch();
        let snapshot = latest
            .wait_for(|snapshot| {
                snapshot
                    .as_ref()
                    .is_some_and(|s| s.id != handle.id || s.status.is_settled())
            })
            .await
            .map_err(|_| SyncError::SessionNotFound(handle.id))?;

        match &*snapshot {
            Some(session) if session.id == handle.id => Ok(session.clone()),
            _ => Err(SyncError::SessionNotFound(handle.id)),
        }
    }

    /// The session's conflicts, in detection order.
    pub async fn get_conflicts(&self, id: SessionId) -> Result<Vec<ConflictRecord>> {
        let mut slot = self.inner.slot.lock().await;
        Ok(find(&mut slot, id)?.session.conflicts.as_slice().to_vec())
    }

    /// Resolve one conflict. Requires `conflict`.
    pub async fn set_resolution(
        &self,
        id: SessionId,
        key: &ConflictKey,
        kind: ResolutionKind,
        manual_override: Option<PartialRecord>,
    ) -> Result<ConflictRecord> {
        let mut slot = self.inner.slot.lock().await;
        let active = find(&mut slot, id)?;
        active.session.require(SessionStatus::Conflict, "resolve")?;

        active.session.conflicts.set_resolution(
            key,
            kind,
            manual_override.as_ref(),
            &self.inner.config.policy.merge,
        )?;

        let resolved = active
            .session
            .conflicts
            .get(key)
            .cloned()
            .ok_or_else(|| tally_engine::Error::UnknownConflict(key.clone()))?;

        tracing::debug!(session_id = %id, key = %key, resolution = %kind, "Conflict resolved");
        active.session.updated_at = Utc::now();
        self.inner.progress.publish(active.session.clone());
        Ok(resolved)
    }

    /// Resolve every unresolved conflict (every conflict with `force`) with
    /// one strategy. Returns how many were written. Requires `conflict`.
    pub async fn set_resolution_for_all(
        &self,
        id: SessionId,
        kind: ResolutionKind,
        force: bool,
    ) -> Result<usize> {
        let mut slot = self.inner.slot.lock().await;
        let active = find(&mut slot, id)?;
        active.session.require(SessionStatus::Conflict, "resolve")?;

        let written = active.session.conflicts.set_resolution_for_all(
            kind,
            force,
            &self.inner.config.policy.merge,
        )?;

        tracing::debug!(session_id = %id, resolution = %kind, force, written, "Bulk resolution applied");
        active.session.updated_at = Utc::now();
        self.inner.progress.publish(active.session.clone());
        Ok(written)
    }

    /// Whether every conflict has a resolution. Requires `conflict`.
    pub async fn is_fully_resolved(&self, id: SessionId) -> Result<bool> {
        let mut slot = self.inner.slot.lock().await;
        let active = find(&mut slot, id)?;
        active.session.require(SessionStatus::Conflict, "check resolution")?;
        Ok(active.session.conflicts.is_fully_resolved())
    }

    /// Commit a fully resolved session.
    ///
    /// Fails with [`tally_engine::Error::IncompleteResolution`] while any
    /// conflict is unresolved. Otherwise pushes the resolutions to the
    /// remote, writes the resolved records through the store and moves the
    /// session to `success`. The manager stays locked for the whole
    /// round-trip.
    ///
    /// A fatal remote rejection moves the session to `error`. Exhausted
    /// retries leave it in `conflict` so finalize can be retried.
    pub async fn finalize(&self, id: SessionId) -> Result<SyncResult> {
        let mut slot = self.inner.slot.lock().await;
        let active = find(&mut slot, id)?;
        active.session.require(SessionStatus::Conflict, "finalize")?;
        active.session.conflicts.ensure_resolved()?;

        let remote_id = active
            .session
            .remote_id
            .clone()
            .ok_or_else(|| SyncError::RemoteFatal("session has no remote operation".into()))?;
        let resolutions = active.session.conflicts.resolutions();
        let token = active.token.clone();

        let pushed = retry(&self.inner.config.retry, &token, "resolve", || {
            self.inner.remote.resolve(&remote_id, &resolutions)
        })
        .await;

        let remote_result = match pushed {
            Ok(result) => result,
            Err(err @ SyncError::RemoteFatal(_)) => {
                active.session.record_error(err.to_string());
                active.session.transition(SessionStatus::Error, "finalize")?;
                tracing::error!(session_id = %id, error = %err, "Finalize rejected by remote");
                self.inner.progress.publish(active.session.clone());
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(session_id = %id, error = %err, "Finalize failed, session still in conflict");
                return Err(err);
            }
        };

        let result = self
            .inner
            .commit(active, remote_result.errors)
            .await?;
        tracing::info!(
            session_id = %id,
            conflicts_resolved = result.conflicts_resolved,
            success = result.success,
            "Sync session finalized"
        );
        Ok(result)
    }

    /// Read-only reconciliation report, optionally restricted to one
    /// category.
    ///
    /// By default the remote's details are re-aggregated. With
    /// `include_records` the remote's record snapshot is reconciled against
    /// the local store instead.
    pub async fn get_reconciliation_report(
        &self,
        options: ReportOptions,
    ) -> Result<ReconciliationReport> {
        let token = self.inner.shutdown.child_token();
        let remote = retry(&self.inner.config.retry, &token, "report", || {
            self.inner.remote.reconciliation_report(&options)
        })
        .await?;

        let report = match remote.records {
            Some(remote_records) if options.include_records => {
                let local = self.inner.store.load_all().await?;
                tracing::debug!(
                    local = local.len(),
                    remote = remote_records.len(),
                    "Reconciling report locally"
                );
                Reconciler::new(&self.inner.config.policy)
                    .reconcile(local, remote_records)
                    .report()
            }
            _ => ReconciliationReport::from_details(remote.details),
        };
        Ok(match options.category.as_deref() {
            Some(category) => report.for_category(category),
            None => report,
        })
    }

    /// Cancel any active session and refuse new ones.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let mut slot = self.inner.slot.lock().await;
        if let Some(active) = slot.as_mut() {
            if active.session.status.is_active() && active.session.reset().is_ok() {
                active.pending = PendingCommit::default();
                tracing::info!(session_id = %active.session.id, "Sync session cancelled on shutdown");
                self.inner.progress.publish(active.session.clone());
            }
        }
    }
}

/// The active session with `id`.
fn find(slot: &mut Option<Active>, id: SessionId) -> Result<&mut Active> {
    slot.as_mut()
        .filter(|active| active.session.id == id)
        .ok_or(SyncError::SessionNotFound(id))
}

impl Inner {
    /// Background task body for one session.
    async fn run(self: Arc<Self>, id: SessionId, token: CancellationToken, options: SyncOptions) {
        match self.drive(id, &token, &options).await {
            Ok(()) => {}
            Err(SyncError::Cancelled) => {
                tracing::debug!(session_id = %id, "Sync task stopped after cancellation");
            }
            Err(err) => self.fail(id, &token, err).await,
        }
    }

    async fn drive(&self, id: SessionId, token: &CancellationToken, options: &SyncOptions) -> Result<()> {
        let remote_id = retry(&self.config.retry, token, "start", || self.remote.start(options)).await?;
        tracing::debug!(session_id = %id, remote_id = %remote_id, "Remote operation started");
        self.update(id, token, |session| session.remote_id = Some(remote_id.clone()))
            .await?;

        let deadline = Instant::now() + self.config.poll_budget;
        let status = loop {
            if Instant::now() >= deadline {
                return Err(SyncError::Network(format!(
                    "sync did not finish within {}s",
                    self.config.poll_budget.as_secs()
                )));
            }

            let status = retry(&self.config.retry, token, "status", || self.remote.status(&remote_id)).await?;
            if status.state.is_terminal() {
                break status;
            }

            tracing::debug!(
                session_id = %id,
                progress = status.progress,
                processed = status.processed_items,
                total = status.total_items,
                "Poll tick"
            );
            self.update(id, token, |session| {
                session.record_progress(
                    status.progress,
                    status.processed_items,
                    status.total_items,
                    status.current_item.clone(),
                )
            })
            .await?;

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        };

        self.complete(id, token, &remote_id, status).await
    }

    /// Handle a terminal remote status.
    async fn complete(
        &self,
        id: SessionId,
        token: &CancellationToken,
        remote_id: &str,
        status: RemoteStatus,
    ) -> Result<()> {
        if status.state == RemoteState::Failed {
            let message = if status.errors.is_empty() {
                "remote sync failed".to_string()
            } else {
                status.errors.join("; ")
            };
            return Err(SyncError::RemoteFatal(message));
        }

        let mut pending = PendingCommit {
            baseline: status.changes,
            remote_only: Vec::new(),
        };

        let conflicts = match status.records {
            Some(remote_records) => {
                let local = self.store.load_all().await?;
                let mut reconciled = Reconciler::new(&self.config.policy).reconcile(local, remote_records);
                let conflicts = reconciled.take_conflicts();
                pending.baseline.items_added += reconciled.remote_only.len() as u64;
                pending.remote_only = reconciled.remote_only;
                tracing::debug!(
                    session_id = %id,
                    matched = reconciled.matched.len(),
                    local_only = reconciled.local_only.len(),
                    remote_only = pending.remote_only.len(),
                    conflicts = conflicts.len(),
                    "Reconciled locally"
                );
                conflicts
            }
            None => self.ingest_conflicts(id, status.conflicts),
        };

        let mut slot = self.slot.lock().await;
        let active = self.current(&mut slot, id, token)?;
        active.session.record_progress(
            100,
            status.processed_items,
            status.total_items,
            status.current_item,
        );
        for message in status.errors {
            active.session.record_error(message);
        }
        active.pending = pending;

        if !conflicts.is_empty() {
            let count = conflicts.len();
            active.session.conflicts = conflicts;
            active.session.transition(SessionStatus::Conflict, "complete")?;
            tracing::info!(session_id = %id, conflicts = count, "Sync needs conflict resolution");
            self.progress.publish(active.session.clone());
            return Ok(());
        }

        if status.state != RemoteState::NeedsValidation {
            return self.finish(id, active, Vec::new()).await;
        }
        drop(slot);

        // Nothing to resolve, but a remote waiting for validation still
        // expects an (empty) resolution before it commits
        let result = retry(&self.config.retry, token, "resolve", || self.remote.resolve(remote_id, &[])).await?;

        let mut slot = self.slot.lock().await;
        let active = self.current(&mut slot, id, token)?;
        self.finish(id, active, result.errors).await
    }

    /// Convert remote-computed conflicts, keeping every one addressable.
    fn ingest_conflicts(&self, id: SessionId, reported: Vec<RemoteConflict>) -> ConflictSet {
        let conflicts = reported
            .into_iter()
            .filter_map(|remote| {
                let key = remote.key.clone();
                let conflict = remote.into_conflict(&self.config.policy.comparison);
                if conflict.is_none() {
                    tracing::warn!(session_id = %id, key = %key, "Dropping remote conflict with no differing fields");
                }
                conflict
            })
            .collect();
        ConflictSet::with_unique_keys(conflicts)
    }

    /// Commit a session that had nothing to resolve.
    async fn finish(&self, id: SessionId, active: &mut Active, remote_errors: Vec<String>) -> Result<()> {
        let result = self.commit(active, remote_errors).await?;
        tracing::info!(
            session_id = %id,
            items_added = result.items_added,
            items_updated = result.items_updated,
            success = result.success,
            "Sync session completed"
        );
        Ok(())
    }

    /// Write through, tally the result and move to `success`.
    async fn commit(&self, active: &mut Active, remote_errors: Vec<String>) -> Result<SyncResult> {
        let mut writes: Vec<StoreWrite> = active
            .session
            .conflicts
            .iter()
            .filter_map(|c| Some(StoreWrite::replace(c.resolved_record()?, c.occurrence())))
            .collect();
        writes.extend(active.pending.remote_only.iter().cloned().map(StoreWrite::append));

        let mut errors = active.session.error_messages();
        errors.extend(remote_errors);

        if !writes.is_empty() {
            if let Err(err) = self.store.write_resolved(&writes).await {
                tracing::error!(session_id = %active.session.id, error = %err, "Write-through failed");
                errors.push(SyncError::from(err).to_string());
            }
        }

        let result = SyncResult::tally(
            active.pending.baseline,
            &active.session.conflicts,
            errors,
            Utc::now(),
        );

        active.session.progress = 100;
        active.session.transition(SessionStatus::Success, "commit")?;
        active.session.result = Some(result.clone());
        active.pending = PendingCommit::default();
        self.progress.publish(active.session.clone());
        Ok(result)
    }

    /// Move the session to `error`, unless it was cancelled meanwhile.
    async fn fail(&self, id: SessionId, token: &CancellationToken, err: SyncError) {
        let mut slot = self.slot.lock().await;
        let Ok(active) = self.current(&mut slot, id, token) else {
            return;
        };

        active.session.record_error(err.to_string());
        if active.session.transition(SessionStatus::Error, "fail").is_ok() {
            tracing::error!(session_id = %id, error = %err, "Sync session failed");
            self.progress.publish(active.session.clone());
        }
    }

    /// Apply `change` to a still-syncing session and publish it.
    async fn update<F>(&self, id: SessionId, token: &CancellationToken, change: F) -> Result<()>
    where
        F: FnOnce(&mut SyncSession),
    {
        let mut slot = self.slot.lock().await;
        let active = self.current(&mut slot, id, token)?;
        change(&mut active.session);
        self.progress.publish(active.session.clone());
        Ok(())
    }

    /// The session `id` if it is still syncing and not cancelled.
    ///
    /// Anything else means the caller's result is stale and must be
    /// discarded.
    fn current<'a>(
        &self,
        slot: &'a mut Option<Active>,
        id: SessionId,
        token: &CancellationToken,
    ) -> Result<&'a mut Active> {
        match slot.as_mut() {
            Some(active)
                if active.session.id == id
                    && !token.is_cancelled()
                    && active.session.status == SessionStatus::Syncing =>
            {
                Ok(active)
            }
            _ => {
                tracing::warn!(session_id = %id, "Discarding result for a session that is no longer syncing");
                Err(SyncError::Cancelled)
            }
        }
    }
}
