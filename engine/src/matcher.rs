//! Identity matcher.
//!
//! Partitions a local and a remote record snapshot by composite key into
//! paired records, local-only records, and remote-only records.
//!
//! # Duplicate keys
//!
//! Unserialized stock shares a key, so a key can name several records on
//! either side. There is no stronger identity to go on, so pairing within a
//! shared key follows an explicit [`TieBreak`] rule:
//!
//! - [`TieBreak::Positional`]: the n-th local record with the key pairs with
//!   the n-th remote record with the key, in input order.
//! - [`TieBreak::ClosestMatch`]: each local record (in input order) pairs
//!   with the remaining remote record that differs in the fewest comparison
//!   fields; ties go to the earlier remote record.
//!
//! Surplus records on either side of a shared key are local-only or
//! remote-only. Output order is deterministic: pairs and local-only records
//! follow local input order, remote-only records follow remote input order.

use crate::{diff::diff_count, ComparisonSchema, CompositeKey, PropertyRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pairing rule for records that share a composite key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TieBreak {
    /// First local to first remote, second to second (default)
    #[default]
    Positional,
    /// Fewest differing comparison fields, earliest remote on ties
    ClosestMatch,
}

/// A local and remote record with the same identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub key: CompositeKey,
    /// Position of this pair among pairs sharing `key`
    pub occurrence: usize,
    pub local: PropertyRecord,
    pub remote: PropertyRecord,
}

/// The three partitions produced by the matcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    /// Present on both sides; candidates for diffing
    pub pairs: Vec<MatchedPair>,
    pub local_only: Vec<PropertyRecord>,
    pub remote_only: Vec<PropertyRecord>,
}

/// Matches records by composite key.
pub struct IdentityMatcher<'a> {
    schema: &'a ComparisonSchema,
    tie_break: TieBreak,
}

impl<'a> IdentityMatcher<'a> {
    /// Create a matcher. The schema is only consulted by
    /// [`TieBreak::ClosestMatch`].
    pub fn new(schema: &'a ComparisonSchema, tie_break: TieBreak) -> Self {
        Self { schema, tie_break }
    }

    /// Partition both snapshots.
    pub fn match_records(
        &self,
        local: Vec<PropertyRecord>,
        remote: Vec<PropertyRecord>,
    ) -> MatchOutcome {
        // Remote lookup: key -> remote indices in input order
        let mut by_key: HashMap<CompositeKey, Vec<usize>> = HashMap::new();
        for (idx, record) in remote.iter().enumerate() {
            by_key.entry(record.key()).or_default().push(idx);
        }
        let mut remote: Vec<Option<PropertyRecord>> = remote.into_iter().map(Some).collect();
        let mut pairs_per_key: HashMap<CompositeKey, usize> = HashMap::new();

        let mut outcome = MatchOutcome::default();

        for local_record in local {
            let key = local_record.key();
            let candidate = by_key
                .get_mut(&key)
                .and_then(|candidates| self.pick(&local_record, candidates, &remote));

            match candidate.and_then(|idx| remote[idx].take()) {
                Some(remote_record) => {
                    let occurrence = pairs_per_key.entry(key.clone()).or_insert(0);
                    outcome.pairs.push(MatchedPair {
                        key,
                        occurrence: *occurrence,
                        local: local_record,
                        remote: remote_record,
                    });
                    *occurrence += 1;
                }
                None => outcome.local_only.push(local_record),
            }
        }

        outcome.remote_only = remote.into_iter().flatten().collect();
        outcome
    }

    /// Choose a remote index for `local` and remove it from `candidates`.
    fn pick(
        &self,
        local: &PropertyRecord,
        candidates: &mut Vec<usize>,
        remote: &[Option<PropertyRecord>],
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let position = match self.tie_break {
            TieBreak::Positional => 0,
            TieBreak::ClosestMatch => {
                let mut best: Option<(usize, usize)> = None;
                for (pos, &idx) in candidates.iter().enumerate() {
                    let Some(candidate) = remote[idx].as_ref() else {
                        continue;
                    };
                    let distance = diff_count(local, candidate, self.schema);
                    // Strict less-than keeps the earliest remote on ties
                    if best.map_or(true, |(_, d)| distance < d) {
                        best = Some((pos, distance));
                    }
                }
                best.map(|(pos, _)| pos)?
            }
        };

        Some(candidates.remove(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(nsn: &str, location: &str) -> PropertyRecord {
        PropertyRecord::new(nsn).with_field("location", location)
    }

    #[test]
    fn partitions_by_key() {
        let schema = ComparisonSchema::default();
        let matcher = IdentityMatcher::new(&schema, TieBreak::Positional);

        let local = vec![
            PropertyRecord::new("A").with_serial("1"),
            PropertyRecord::new("B"),
        ];
        let remote = vec![
            PropertyRecord::new("A").with_serial("1"),
            PropertyRecord::new("C"),
        ];

        let outcome = matcher.match_records(local, remote);

        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].key, CompositeKey::serialized("A", "1"));
        assert_eq!(outcome.local_only, vec![PropertyRecord::new("B")]);
        assert_eq!(outcome.remote_only, vec![PropertyRecord::new("C")]);
    }

    #[test]
    fn serial_number_is_part_of_identity() {
        let schema = ComparisonSchema::default();
        let matcher = IdentityMatcher::new(&schema, TieBreak::Positional);

        let outcome = matcher.match_records(
            vec![PropertyRecord::new("A").with_serial("1")],
            vec![PropertyRecord::new("A").with_serial("2")],
        );

        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.local_only.len(), 1);
        assert_eq!(outcome.remote_only.len(), 1);
    }

    #[test]
    fn positional_pairs_duplicates_in_order() {
        let schema = ComparisonSchema::default();
        let matcher = IdentityMatcher::new(&schema, TieBreak::Positional);

        let local = vec![bulk("N", "Bay 1"), bulk("N", "Bay 2"), bulk("N", "Bay 3")];
        let remote = vec![bulk("N", "Bay 2"), bulk("N", "Bay 1")];

        let outcome = matcher.match_records(local, remote);

        assert_eq!(outcome.pairs.len(), 2);
        assert_eq!(outcome.pairs[0].occurrence, 0);
        assert_eq!(outcome.pairs[0].local.get("location"), Some(&serde_json::json!("Bay 1")));
        assert_eq!(outcome.pairs[0].remote.get("location"), Some(&serde_json::json!("Bay 2")));
        assert_eq!(outcome.pairs[1].occurrence, 1);
        assert_eq!(outcome.local_only, vec![bulk("N", "Bay 3")]);
        assert!(outcome.remote_only.is_empty());
    }

    #[test]
    fn closest_match_minimizes_differences() {
        let schema = ComparisonSchema::default();
        let matcher = IdentityMatcher::new(&schema, TieBreak::ClosestMatch);

        let local = vec![bulk("N", "Bay 1"), bulk("N", "Bay 2")];
        let remote = vec![bulk("N", "Bay 2"), bulk("N", "Bay 1")];

        let outcome = matcher.match_records(local, remote);

        assert_eq!(outcome.pairs.len(), 2);
        for pair in &outcome.pairs {
            assert_eq!(pair.local, pair.remote);
        }
        assert_eq!(outcome.pairs[1].occurrence, 1);
    }

    #[test]
    fn closest_match_ties_take_earliest_remote() {
        let schema = ComparisonSchema::default();
        let matcher = IdentityMatcher::new(&schema, TieBreak::ClosestMatch);

        let local = vec![bulk("N", "Bay 9")];
        let remote = vec![bulk("N", "Bay 1"), bulk("N", "Bay 2")];

        let outcome = matcher.match_records(local, remote);

        assert_eq!(outcome.pairs[0].remote, bulk("N", "Bay 1"));
        assert_eq!(outcome.remote_only, vec![bulk("N", "Bay 2")]);
    }

    #[test]
    fn empty_inputs() {
        let schema = ComparisonSchema::default();
        let matcher = IdentityMatcher::new(&schema, TieBreak::default());
        assert_eq!(matcher.match_records(vec![], vec![]), MatchOutcome::default());
    }
}
