//! Contract with the external system of record.
//!
//! The session manager only sees this trait. Transport, encoding and the
//! credential used to reach the remote are the implementation's business;
//! retrying transient failures is the manager's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tally_engine::{
    diff_fields, Category, ChangeCounts, ComparisonSchema, CompositeKey, ConflictRecord,
    FieldName, PartialRecord, PropertyRecord, ReportDetail,
    ResolutionEntry, SyncResult, UNCATEGORIZED,
};
use thiserror::Error;

/// Failure of a remote call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Worth retrying: connection failures, timeouts, overload
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// Not worth retrying: the remote rejected the request
    #[error("fatal remote failure: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Options for starting a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    /// Restrict the sync to these categories; empty means all
    pub categories: Vec<Category>,
    /// Ask the remote to return its record snapshot so reconciliation is
    /// computed locally
    pub include_records: bool,
}

/// Options for a reconciliation report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportOptions {
    /// Only report this category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Ask the remote for its record snapshot and reconcile it against the
    /// local store instead of using the remote's classification
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_records: bool,
}

/// Phase of the remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteState {
    Running,
    /// Finished without anything to validate
    Completed,
    /// Finished; the two sides must be reconciled before commit
    NeedsValidation,
    /// Finished with a non-retryable error
    Failed,
}

impl RemoteState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteState::Running)
    }
}

/// A conflict as computed by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConflict {
    pub key: CompositeKey,
    #[serde(default)]
    pub occurrence: usize,
    #[serde(default)]
    pub category: Option<Category>,
    pub local_data: PartialRecord,
    pub remote_data: PartialRecord,
    #[serde(default)]
    pub conflict_fields: BTreeSet<FieldName>,
}

impl RemoteConflict {
    /// Convert to an engine conflict.
    ///
    /// A remote that omits `conflictFields` gets them recomputed against
    /// `schema`. `None` when the two sides agree on every comparison field.
    pub fn into_conflict(self, schema: &ComparisonSchema) -> Option<ConflictRecord> {
        let category = self
            .category
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        let conflict_fields = if self.conflict_fields.is_empty() {
            diff_fields(
                &self.side(&self.local_data),
                &self.side(&self.remote_data),
                schema,
            )
        } else {
            self.conflict_fields
        };
        ConflictRecord::new(
            self.key,
            self.occurrence,
            category,
            self.local_data,
            self.remote_data,
            conflict_fields,
        )
    }

    fn side(&self, data: &PartialRecord) -> PropertyRecord {
        PropertyRecord {
            nsn: self.key.nsn.clone(),
            serial_number: self.key.serial_number.clone(),
            category: None,
            fields: data.clone(),
        }
    }
}

/// One status poll of the remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub state: RemoteState,
    /// Percentage, 0 to 100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub current_item: Option<CompositeKey>,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub processed_items: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Remote-computed conflicts
    #[serde(default)]
    pub conflicts: Vec<RemoteConflict>,
    /// Remote record snapshot, when requested with `includeRecords`
    #[serde(default)]
    pub records: Option<Vec<PropertyRecord>>,
    #[serde(flatten)]
    pub changes: ChangeCounts,
}

impl RemoteStatus {
    /// A running status at the given progress.
    pub fn running(progress: u8, processed_items: u64, total_items: u64) -> Self {
        Self {
            state: RemoteState::Running,
            progress,
            current_item: None,
            total_items,
            processed_items,
            errors: Vec::new(),
            conflicts: Vec::new(),
            records: None,
            changes: ChangeCounts::default(),
        }
    }

    /// A terminal status with the given state.
    pub fn finished(state: RemoteState) -> Self {
        Self {
            state,
            progress: 100,
            ..Self::running(100, 0, 0)
        }
    }
}

/// A reconciliation report as returned by the remote.
///
/// Only the details are kept; the summary is always re-aggregated locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReport {
    #[serde(default)]
    pub details: Vec<ReportDetail>,
    /// Remote record snapshot, when requested with `includeRecords`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<PropertyRecord>>,
}

/// The external sync API.
#[async_trait]
pub trait RemoteSyncApi: Send + Sync {
    /// Begin a sync; returns the remote's operation id.
    async fn start(&self, options: &SyncOptions) -> Result<String, RemoteError>;

    /// Poll the operation.
    async fn status(&self, remote_id: &str) -> Result<RemoteStatus, RemoteError>;

    /// Push resolved conflicts and commit.
    async fn resolve(
        &self,
        remote_id: &str,
        resolutions: &[ResolutionEntry],
    ) -> Result<SyncResult, RemoteError>;

    /// Read-only reconciliation report.
    async fn reconciliation_report(
        &self,
        options: &ReportOptions,
    ) -> Result<RemoteReport, RemoteError>;
}
