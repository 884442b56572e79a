//! Local property store.
//!
//! Committed records are written through a [`PropertyStore`]. The manager
//! never reads the store back during a session; [`PropertyStore::load_all`]
//! supplies the local side of a reconciliation.

use async_trait::async_trait;
use tally_engine::{CompositeKey, PropertyRecord};
use thiserror::Error;
use tokio::sync::RwLock;

/// Failure of the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected record {key}: {reason}")]
    Rejected { key: CompositeKey, reason: String },
}

/// Where a written record lands among the stored records sharing its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Replace the n-th stored record with the key, the occurrence the
    /// record was reconciled at. Appended if the key has fewer records.
    Occurrence(usize),
    /// Add a new record after the key's existing ones
    Append,
}

/// One record to write through.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreWrite {
    pub record: PropertyRecord,
    pub placement: Placement,
}

impl StoreWrite {
    /// Replace the record reconciled at `occurrence` of its key.
    pub fn replace(record: PropertyRecord, occurrence: usize) -> Self {
        Self {
            record,
            placement: Placement::Occurrence(occurrence),
        }
    }

    /// Add a record the store does not hold yet.
    pub fn append(record: PropertyRecord) -> Self {
        Self {
            record,
            placement: Placement::Append,
        }
    }
}

/// Reject a batch holding a record without a stock number.
pub fn validate_writes(writes: &[StoreWrite]) -> Result<(), StoreError> {
    match writes.iter().find(|w| w.record.nsn.trim().is_empty()) {
        Some(write) => Err(StoreError::Rejected {
            key: write.record.key(),
            reason: "empty NSN".into(),
        }),
        None => Ok(()),
    }
}

/// Write-through storage for the local view of property records.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Every locally held record. Records sharing a key keep their relative
    /// order across calls, so the n-th one is occurrence n.
    async fn load_all(&self) -> Result<Vec<PropertyRecord>, StoreError>;

    /// Apply committed records atomically.
    ///
    /// Replacements are resolved against the records stored before the
    /// call; appends land after them.
    async fn write_resolved(&self, writes: &[StoreWrite]) -> Result<(), StoreError>;
}

/// In-process store backed by a vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<PropertyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `records`.
    pub fn with_records(records: Vec<PropertyRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<PropertyRecord>, StoreError> {
        Ok(self.records.read().await.clone())
    }

    async fn write_resolved(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        validate_writes(writes)?;

        let mut stored = self.records.write().await;
        let mut appended = Vec::new();

        for write in writes {
            let key = write.record.key();
            let slot = match write.placement {
                Placement::Occurrence(occurrence) => stored
                    .iter()
                    .enumerate()
                    .filter(|(_, existing)| existing.key() == key)
                    .nth(occurrence)
                    .map(|(idx, _)| idx),
                Placement::Append => None,
            };

            match slot {
                Some(idx) => stored[idx] = write.record.clone(),
                None => appended.push(write.record.clone()),
            }
        }
        stored.extend(appended);

        tracing::debug!(written = writes.len(), total = stored.len(), "Wrote records to memory store");
        Ok(())
    }
}
