//! Reconciliation aggregator and report types.

use crate::{Category, Classification, CompositeKey, FieldName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The four classification counters plus their total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCounts {
    pub total_items: u64,
    pub matched_items: u64,
    pub local_only_items: u64,
    pub remote_only_items: u64,
    pub conflict_items: u64,
}

impl CategoryCounts {
    /// Count one classified item.
    pub fn record(&mut self, classification: Classification) {
        self.total_items += 1;
        match classification {
            Classification::Matched => self.matched_items += 1,
            Classification::LocalOnly => self.local_only_items += 1,
            Classification::RemoteOnly => self.remote_only_items += 1,
            Classification::Conflict => self.conflict_items += 1,
        }
    }

    /// Whether the total equals the sum of the four counters.
    pub fn is_consistent(&self) -> bool {
        self.total_items
            == self.matched_items + self.local_only_items + self.remote_only_items + self.conflict_items
    }
}

/// Aggregate counts, overall and per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationSummary {
    pub total_items: u64,
    pub matched_items: u64,
    pub local_only_items: u64,
    pub remote_only_items: u64,
    pub conflict_items: u64,
    /// Per-category buckets, created on first use
    #[serde(default)]
    pub by_category: BTreeMap<Category, CategoryCounts>,
}

impl ReconciliationSummary {
    /// The overall counters as a [`CategoryCounts`].
    pub fn totals(&self) -> CategoryCounts {
        CategoryCounts {
            total_items: self.total_items,
            matched_items: self.matched_items,
            local_only_items: self.local_only_items,
            remote_only_items: self.remote_only_items,
            conflict_items: self.conflict_items,
        }
    }

    /// Whether the totals invariant holds overall and in every bucket, and
    /// the buckets add up to the overall counts.
    pub fn is_consistent(&self) -> bool {
        let mut from_buckets = CategoryCounts::default();
        for counts in self.by_category.values() {
            if !counts.is_consistent() {
                return false;
            }
            from_buckets.total_items += counts.total_items;
            from_buckets.matched_items += counts.matched_items;
            from_buckets.local_only_items += counts.local_only_items;
            from_buckets.remote_only_items += counts.remote_only_items;
            from_buckets.conflict_items += counts.conflict_items;
        }
        self.totals().is_consistent() && from_buckets == self.totals()
    }
}

/// Folds classified items into a [`ReconciliationSummary`].
#[derive(Debug, Default)]
pub struct Aggregator {
    totals: CategoryCounts,
    by_category: BTreeMap<Category, CategoryCounts>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one item in the totals and in its category bucket.
    pub fn record(&mut self, category: &str, classification: Classification) {
        self.totals.record(classification);
        self.by_category
            .entry(category.to_string())
            .or_default()
            .record(classification);
    }

    pub fn finish(self) -> ReconciliationSummary {
        ReconciliationSummary {
            total_items: self.totals.total_items,
            matched_items: self.totals.matched_items,
            local_only_items: self.totals.local_only_items,
            remote_only_items: self.totals.remote_only_items,
            conflict_items: self.totals.conflict_items,
            by_category: self.by_category,
        }
    }
}

/// One classified item in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetail {
    pub key: CompositeKey,
    #[serde(default)]
    pub occurrence: usize,
    pub category: Category,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub conflict_fields: BTreeSet<FieldName>,
}

/// A summary together with the items it was computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub summary: ReconciliationSummary,
    pub details: Vec<ReportDetail>,
}

impl ReconciliationReport {
    /// Build a report whose summary is aggregated from `details`.
    pub fn from_details(details: Vec<ReportDetail>) -> Self {
        let mut aggregator = Aggregator::new();
        for detail in &details {
            aggregator.record(&detail.category, detail.classification);
        }
        Self {
            summary: aggregator.finish(),
            details,
        }
    }

    /// Restrict the report to one category, re-aggregating the summary.
    pub fn for_category(self, category: &str) -> Self {
        Self::from_details(
            self.details
                .into_iter()
                .filter(|d| d.category == category)
                .collect(),
        )
    }
}
