//! Reconciliation of a local snapshot against a remote snapshot.
//!
//! # Algorithm
//!
//! 1. Match records by composite key ([`IdentityMatcher`])
//! 2. Diff every matched pair over the comparison schema
//! 3. Classify: agreeing pairs are matched, disagreeing pairs are conflicts,
//!    unpaired records are local-only or remote-only
//! 4. Aggregate the classifications into a summary on request
//!
//! The same inputs and policy always produce the same result.

use crate::{
    summary::{Aggregator, ReportDetail},
    ComparisonSchema, ConflictRecord, ConflictSet, MatchedPair, MergePolicy, PropertyRecord,
    ReconciliationReport, ReconciliationSummary, IdentityMatcher, TieBreak,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Relationship between the two views of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    Matched,
    LocalOnly,
    RemoteOnly,
    Conflict,
}

/// Everything that shapes a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilePolicy {
    /// Fields that take part in diffing
    pub comparison: ComparisonSchema,
    /// Fields `merge` takes from local
    pub merge: MergePolicy,
    /// Pairing rule for shared unserialized keys
    pub tie_break: TieBreak,
}

/// Result of reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileResult {
    /// Pairs that agree on every comparison field
    pub matched: Vec<MatchedPair>,
    pub local_only: Vec<PropertyRecord>,
    pub remote_only: Vec<PropertyRecord>,
    /// Pairs that disagree on at least one comparison field
    pub conflicts: Vec<ConflictRecord>,
}

impl ReconcileResult {
    pub fn total_items(&self) -> usize {
        self.matched.len() + self.local_only.len() + self.remote_only.len() + self.conflicts.len()
    }

    /// Aggregate into counts, overall and per category.
    ///
    /// Paired items count toward the local record's category.
    pub fn summary(&self) -> ReconciliationSummary {
        let mut aggregator = Aggregator::new();
        for pair in &self.matched {
            aggregator.record(pair.local.category_or_default(), Classification::Matched);
        }
        for record in &self.local_only {
            aggregator.record(record.category_or_default(), Classification::LocalOnly);
        }
        for record in &self.remote_only {
            aggregator.record(record.category_or_default(), Classification::RemoteOnly);
        }
        for conflict in &self.conflicts {
            aggregator.record(conflict.category(), Classification::Conflict);
        }
        aggregator.finish()
    }

    /// One detail line per item.
    pub fn details(&self) -> Vec<ReportDetail> {
        let plain = |record: &PropertyRecord, occurrence: usize, classification| ReportDetail {
            key: record.key(),
            occurrence,
            category: record.category_or_default().to_string(),
            classification,
            conflict_fields: BTreeSet::new(),
        };

        let mut details = Vec::with_capacity(self.total_items());
        details.extend(
            self.matched
                .iter()
                .map(|p| plain(&p.local, p.occurrence, Classification::Matched)),
        );
        details.extend(self.conflicts.iter().map(|c| ReportDetail {
            key: c.key().clone(),
            occurrence: c.occurrence(),
            category: c.category().to_string(),
            classification: Classification::Conflict,
            conflict_fields: c.conflict_fields().clone(),
        }));
        details.extend(
            self.local_only
                .iter()
                .map(|r| plain(r, 0, Classification::LocalOnly)),
        );
        details.extend(
            self.remote_only
                .iter()
                .map(|r| plain(r, 0, Classification::RemoteOnly)),
        );
        details
    }

    pub fn report(&self) -> ReconciliationReport {
        ReconciliationReport {
            summary: self.summary(),
            details: self.details(),
        }
    }

    /// Move the conflicts out as a session-owned set.
    pub fn take_conflicts(&mut self) -> ConflictSet {
        ConflictSet::new(std::mem::take(&mut self.conflicts))
    }
}

/// Runs matching and diffing under a policy.
pub struct Reconciler<'a> {
    policy: &'a ReconcilePolicy,
}

impl<'a> Reconciler<'a> {
    /// Create a new reconciler.
    pub fn new(policy: &'a ReconcilePolicy) -> Self {
        Self { policy }
    }

    /// Classify every local and remote record.
    pub fn reconcile(
        &self,
        local: Vec<PropertyRecord>,
        remote: Vec<PropertyRecord>,
    ) -> ReconcileResult {
        let matcher = IdentityMatcher::new(&self.policy.comparison, self.policy.tie_break);
        let outcome = matcher.match_records(local, remote);

        let mut result = ReconcileResult {
            local_only: outcome.local_only,
            remote_only: outcome.remote_only,
            ..Default::default()
        };

        for pair in outcome.pairs {
            match ConflictRecord::from_pair(&pair, &self.policy.comparison) {
                Some(conflict) => result.conflicts.push(conflict),
                None => result.matched.push(pair),
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resolve, CompositeKey, ResolutionKind};
    use serde_json::json;

    #[test]
    fn status_disagreement_is_a_conflict() {
        let policy = ReconcilePolicy::default();
        let reconciler = Reconciler::new(&policy);

        let result = reconciler.reconcile(
            vec![PropertyRecord::new("A").with_field("status", "FMC")],
            vec![PropertyRecord::new("A").with_field("status", "NMC")],
        );

        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(
            conflict.conflict_fields().iter().collect::<Vec<_>>(),
            vec!["status"]
        );

        let merged = resolve(conflict, ResolutionKind::Merge, None, &policy.merge).unwrap();
        assert_eq!(merged.get("status"), Some(&json!("FMC")));
        let remote = resolve(conflict, ResolutionKind::Remote, None, &policy.merge).unwrap();
        assert_eq!(remote.get("status"), Some(&json!("NMC")));
    }

    #[test]
    fn local_only_item_is_counted() {
        let policy = ReconcilePolicy::default();
        let result = Reconciler::new(&policy).reconcile(vec![PropertyRecord::new("B")], vec![]);

        let summary = result.summary();
        assert_eq!(summary.local_only_items, 1);
        assert_eq!(summary.conflict_items, 0);
        assert_eq!(summary.total_items, 1);
    }

    #[test]
    fn reconcile_multiple_records_mixed() {
        let policy = ReconcilePolicy::default();
        let reconciler = Reconciler::new(&policy);

        let local = vec![
            PropertyRecord::new("A").with_serial("1").with_category("weapons").with_field("status", "FMC"),
            PropertyRecord::new("B").with_category("comms").with_field("location", "Bay 1"),
            PropertyRecord::new("C").with_category("comms"),
        ];
        let remote = vec![
            PropertyRecord::new("A").with_serial("1").with_field("status", "FMC"),
            PropertyRecord::new("B").with_field("location", "Bay 2"),
            PropertyRecord::new("D").with_category("vehicles"),
        ];

        let result = reconciler.reconcile(local, remote);

        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.local_only.len(), 1);
        assert_eq!(result.remote_only.len(), 1);

        let summary = result.summary();
        assert_eq!(summary.total_items, 4);
        assert_eq!(summary.by_category["weapons"].matched_items, 1);
        assert_eq!(summary.by_category["comms"].conflict_items, 1);
        assert_eq!(summary.by_category["comms"].local_only_items, 1);
        assert_eq!(summary.by_category["vehicles"].remote_only_items, 1);
        assert!(summary.is_consistent());

        let report = result.report();
        assert_eq!(report.details.len(), 4);
        let conflict_detail = report
            .details
            .iter()
            .find(|d| d.classification == Classification::Conflict)
            .unwrap();
        assert_eq!(conflict_detail.key, CompositeKey::bulk("B"));
        assert!(conflict_detail.conflict_fields.contains("location"));
    }

    #[test]
    fn reconcile_deterministic() {
        let policy = ReconcilePolicy::default();
        let local = vec![
            PropertyRecord::new("N").with_field("location", "Bay 1"),
            PropertyRecord::new("N").with_field("location", "Bay 2"),
        ];
        let remote = vec![
            PropertyRecord::new("N").with_field("location", "Bay 3"),
            PropertyRecord::new("N").with_field("location", "Bay 1"),
        ];

        let first = Reconciler::new(&policy).reconcile(local.clone(), remote.clone());
        for _ in 0..10 {
            let again = Reconciler::new(&policy).reconcile(local.clone(), remote.clone());
            assert_eq!(again, first);
        }
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: ReconcilePolicy =
            serde_json::from_value(json!({"tieBreak": "closestMatch"})).unwrap();
        assert_eq!(policy.tie_break, TieBreak::ClosestMatch);
        assert_eq!(policy.merge, MergePolicy::default());
        assert_eq!(policy.comparison, ComparisonSchema::default());
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_record() -> impl Strategy<Value = PropertyRecord> {
            (
                prop_oneof![Just("A"), Just("B"), Just("C"), Just("D")],
                prop::option::of(prop_oneof![Just("1"), Just("2")]),
                prop::option::of(prop_oneof![Just("weapons"), Just("comms")]),
                prop_oneof![Just("FMC"), Just("fmc"), Just("NMC"), Just("PMC")],
                prop_oneof![Just("Arms Room"), Just("Motor Pool")],
                0u32..3,
            )
                .prop_map(|(nsn, serial, category, status, location, qty)| {
                    let mut record = PropertyRecord::new(nsn)
                        .with_field("status", status)
                        .with_field("location", location)
                        .with_field("quantityOnHand", qty);
                    record.serial_number = serial.map(str::to_string);
                    record.category = category.map(str::to_string);
                    record
                })
        }

        fn arb_tie_break() -> impl Strategy<Value = TieBreak> {
            prop_oneof![Just(TieBreak::Positional), Just(TieBreak::ClosestMatch)]
        }

        proptest! {
            #[test]
            fn prop_summary_totals_add_up(
                local in prop::collection::vec(arb_record(), 0..12),
                remote in prop::collection::vec(arb_record(), 0..12),
                tie_break in arb_tie_break(),
            ) {
                let policy = ReconcilePolicy { tie_break, ..Default::default() };
                let result = Reconciler::new(&policy).reconcile(local, remote);
                let summary = result.summary();

                prop_assert!(summary.is_consistent());
                prop_assert_eq!(summary.total_items as usize, result.total_items());
            }

            #[test]
            fn prop_every_record_is_classified_once(
                local in prop::collection::vec(arb_record(), 0..12),
                remote in prop::collection::vec(arb_record(), 0..12),
                tie_break in arb_tie_break(),
            ) {
                let local_len = local.len();
                let remote_len = remote.len();
                let policy = ReconcilePolicy { tie_break, ..Default::default() };
                let result = Reconciler::new(&policy).reconcile(local, remote);

                let paired = result.matched.len() + result.conflicts.len();
                prop_assert_eq!(paired + result.local_only.len(), local_len);
                prop_assert_eq!(paired + result.remote_only.len(), remote_len);
            }

            #[test]
            fn prop_conflicts_never_have_empty_fields(
                local in prop::collection::vec(arb_record(), 0..12),
                remote in prop::collection::vec(arb_record(), 0..12),
            ) {
                let policy = ReconcilePolicy::default();
                let result = Reconciler::new(&policy).reconcile(local, remote);

                for conflict in &result.conflicts {
                    prop_assert!(!conflict.conflict_fields().is_empty());
                }
                for pair in &result.matched {
                    prop_assert!(crate::diff_fields(&pair.local, &pair.remote, &policy.comparison).is_empty());
                }
            }

            #[test]
            fn prop_merge_takes_overrides_from_local(
                local in arb_record(),
                remote_status in prop_oneof![Just("NMC"), Just("PMC")],
                remote_location in prop_oneof![Just("Bay 7"), Just("Supply")],
            ) {
                let mut remote = local.clone()
                    .with_field("status", remote_status)
                    .with_field("location", remote_location)
                    .with_field("nomenclature", "Remote Name");
                remote.category = Some("remote-category".into());

                let policy = ReconcilePolicy::default();
                let result = Reconciler::new(&policy).reconcile(vec![local], vec![remote]);
                prop_assert_eq!(result.conflicts.len(), 1);

                let conflict = &result.conflicts[0];
                let merged = resolve(conflict, ResolutionKind::Merge, None, &policy.merge).unwrap();

                for (name, value) in &merged {
                    if policy.merge.override_fields.contains(name) {
                        prop_assert_eq!(Some(value), conflict.local_data().get(name));
                    } else {
                        prop_assert_eq!(Some(value), conflict.remote_data().get(name));
                    }
                }
                for name in conflict.remote_data().keys() {
                    if !policy.merge.override_fields.contains(name) {
                        prop_assert!(merged.contains_key(name));
                    }
                }
            }
        }
    }
}
