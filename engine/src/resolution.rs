//! Resolution strategies.
//!
//! [`resolve`] is a pure function: it reads a conflict and returns the data
//! the conflict should resolve to. Writing the result back is the caller's
//! job (see [`ConflictRecord::apply`](crate::ConflictRecord::apply)).

use crate::{error::Result, ConflictRecord, Error, FieldName, PartialRecord};
use serde::{Deserialize, Serialize};

/// How a conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionKind {
    /// Keep the local data
    Local,
    /// Take the remote data
    Remote,
    /// Remote data with the merge override fields taken from local
    Merge,
    /// Caller-supplied data
    Manual,
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionKind::Local => write!(f, "local"),
            ResolutionKind::Remote => write!(f, "remote"),
            ResolutionKind::Merge => write!(f, "merge"),
            ResolutionKind::Manual => write!(f, "manual"),
        }
    }
}

/// Fields that `merge` takes from local data.
///
/// Local data is treated as more current for physical custody and status;
/// remote data is authoritative for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicy {
    pub override_fields: Vec<FieldName>,
}

impl MergePolicy {
    pub fn new(override_fields: impl IntoIterator<Item = impl Into<FieldName>>) -> Self {
        Self {
            override_fields: override_fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(["location", "status"])
    }
}

/// Compute the resolved data for a conflict.
///
/// `manual_override` is required for [`ResolutionKind::Manual`] and ignored
/// otherwise.
pub fn resolve(
    conflict: &ConflictRecord,
    kind: ResolutionKind,
    manual_override: Option<&PartialRecord>,
    policy: &MergePolicy,
) -> Result<PartialRecord> {
    match kind {
        ResolutionKind::Local => Ok(conflict.local_data().clone()),
        ResolutionKind::Remote => Ok(conflict.remote_data().clone()),
        ResolutionKind::Merge => {
            let mut merged = conflict.remote_data().clone();
            for field in &policy.override_fields {
                match conflict.local_data().get(field) {
                    Some(value) => {
                        merged.insert(field.clone(), value.clone());
                    }
                    None => {
                        merged.remove(field);
                    }
                }
            }
            Ok(merged)
        }
        ResolutionKind::Manual => manual_override.cloned().ok_or_else(|| {
            Error::InvalidResolution(format!(
                "manual resolution of {} requires override data",
                conflict.conflict_key()
            ))
        }),
    }
}
