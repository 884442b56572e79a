//! Terminal sync results.

use crate::ConflictSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Change counts reported for a sync before conflicts are accounted for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeCounts {
    pub items_added: u64,
    pub items_updated: u64,
    pub items_removed: u64,
}

/// Immutable snapshot of a committed (or failed) sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub items_added: u64,
    pub items_updated: u64,
    pub items_removed: u64,
    pub conflicts_resolved: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncResult {
    /// Tally a commit from the baseline counts and the resolved conflicts.
    ///
    /// Every conflict whose resolved data differs from local data counts as
    /// an update. The result is successful iff `errors` is empty.
    pub fn tally(
        baseline: ChangeCounts,
        conflicts: &ConflictSet,
        errors: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            success: errors.is_empty(),
            items_added: baseline.items_added,
            items_updated: baseline.items_updated + conflicts.local_changes() as u64,
            items_removed: baseline.items_removed,
            conflicts_resolved: (conflicts.len() - conflicts.unresolved_count()) as u64,
            errors,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComparisonSchema, CompositeKey, ConflictRecord, MatchedPair, MergePolicy, PropertyRecord, ResolutionKind};

    fn resolved_set(kinds: &[ResolutionKind]) -> ConflictSet {
        let policy = MergePolicy::default();
        let conflicts = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let nsn = format!("N{}", i);
                let pair = MatchedPair {
                    key: CompositeKey::bulk(nsn.clone()),
                    occurrence: 0,
                    local: PropertyRecord::new(nsn.clone()).with_field("status", "FMC"),
                    remote: PropertyRecord::new(nsn).with_field("status", "NMC"),
                };
                let mut conflict =
                    ConflictRecord::from_pair(&pair, &ComparisonSchema::default()).unwrap();
                conflict.apply(*kind, None, &policy).unwrap();
                conflict
            })
            .collect::<Vec<_>>();
        ConflictSet::new(conflicts)
    }

    #[test]
    fn tally_counts_local_changes_as_updates() {
        let set = resolved_set(&[ResolutionKind::Local, ResolutionKind::Remote, ResolutionKind::Merge]);
        let baseline = ChangeCounts {
            items_added: 2,
            items_updated: 1,
            items_removed: 0,
        };

        let result = SyncResult::tally(baseline, &set, vec![], Utc::now());

        assert!(result.success);
        assert_eq!(result.items_added, 2);
        // Only the remote resolution changes local data; merge keeps local status
        assert_eq!(result.items_updated, 2);
        assert_eq!(result.conflicts_resolved, 3);
    }

    #[test]
    fn errors_mark_result_unsuccessful() {
        let result = SyncResult::tally(
            ChangeCounts::default(),
            &ConflictSet::default(),
            vec!["remote rejected resolution for A".into()],
            Utc::now(),
        );
        assert!(!result.success);
        assert_eq!(result.conflicts_resolved, 0);
    }
}
