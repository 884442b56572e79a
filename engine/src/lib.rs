//! # Tally Engine
//!
//! A deterministic reconciliation engine for property accountability.
//!
//! This crate compares a locally held set of property records with the set
//! held by an external system of record, classifies every item, and carries
//! disagreements to a resolved state. The same inputs always produce the
//! same outputs.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network, disk, or clock
//!   (timestamps are passed in)
//! - **Deterministic**: ordering of every output is defined by input order
//! - **Testable**: pure functions and plain values, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Identity
//!
//! A [`PropertyRecord`] is identified by its [`CompositeKey`]: stock number
//! plus optional serial number. Bulk stock has no serial number, so several
//! records may share a key; the [`IdentityMatcher`] pairs those with a
//! configurable [`TieBreak`].
//!
//! ### Classification
//!
//! Every item ends up in exactly one [`Classification`]:
//! - `matched` - on both sides, agreeing on every comparison field
//! - `localOnly` / `remoteOnly` - on one side only
//! - `conflict` - on both sides, disagreeing on at least one field
//!
//! Field equality is normalized per [`FieldKind`] (case-insensitive text,
//! exact numbers, day-granular dates).
//!
//! ### Resolution
//!
//! A [`ConflictRecord`] is resolved with one of four [`ResolutionKind`]s.
//! `merge` takes the remote data and overrides the fields of the
//! [`MergePolicy`] (by default `location` and `status`) from local. A
//! [`ConflictSet`] refuses to report itself complete while any conflict is
//! unresolved.
//!
//! ## Quick Start
//!
//! ```rust
//! use tally_engine::{PropertyRecord, ReconcilePolicy, Reconciler, ResolutionKind};
//!
//! let policy = ReconcilePolicy::default();
//! let local = vec![PropertyRecord::new("A").with_field("status", "FMC")];
//! let remote = vec![PropertyRecord::new("A").with_field("status", "NMC")];
//!
//! let mut result = Reconciler::new(&policy).reconcile(local, remote);
//! assert_eq!(result.summary().conflict_items, 1);
//!
//! let mut conflicts = result.take_conflicts();
//! conflicts
//!     .set_resolution_for_all(ResolutionKind::Merge, false, &policy.merge)
//!     .unwrap();
//! assert!(conflicts.is_fully_resolved());
//! ```

pub mod compare;
pub mod conflict;
pub mod diff;
pub mod error;
pub mod key;
pub mod matcher;
pub mod reconcile;
pub mod record;
pub mod resolution;
pub mod result;
pub mod summary;

// Re-export main types at crate root
pub use compare::{ComparisonField, ComparisonSchema, FieldKind};
pub use conflict::{ConflictRecord, ConflictSet, ResolutionEntry};
pub use diff::{diff_count, diff_fields};
pub use error::Error;
pub use key::{CompositeKey, ConflictKey};
pub use matcher::{IdentityMatcher, MatchOutcome, MatchedPair, TieBreak};
pub use reconcile::{Classification, ReconcilePolicy, ReconcileResult, Reconciler};
pub use record::{PartialRecord, PropertyRecord, UNCATEGORIZED};
pub use resolution::{resolve, MergePolicy, ResolutionKind};
pub use result::{ChangeCounts, SyncResult};
pub use summary::{
    Aggregator, CategoryCounts, ReconciliationReport, ReconciliationSummary, ReportDetail,
};

/// Type aliases for clarity
pub type Nsn = String;
pub type FieldName = String;
pub type Category = String;
