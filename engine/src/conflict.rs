//! Conflict records and the per-session conflict set.

use crate::{
    diff::diff_fields, error::Result, resolution::resolve, Category, ComparisonSchema,
    CompositeKey, ConflictKey, Error, FieldName, MatchedPair, MergePolicy, PartialRecord,
    PropertyRecord, ResolutionKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A matched pair whose comparison fields disagree.
///
/// Two invariants hold for every value of this type:
/// - `conflict_fields` is never empty;
/// - `resolved_data` is set if and only if `resolution` is set.
///
/// Both are enforced by construction and by [`Deserialize`], which rejects
/// records that violate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ConflictRecordRepr")]
pub struct ConflictRecord {
    key: CompositeKey,
    occurrence: usize,
    category: Category,
    local_data: PartialRecord,
    remote_data: PartialRecord,
    conflict_fields: BTreeSet<FieldName>,
    resolution: Option<ResolutionKind>,
    resolved_data: Option<PartialRecord>,
}

impl ConflictRecord {
    /// Create an unresolved conflict.
    ///
    /// Returns `None` when `conflict_fields` is empty: such a pair is
    /// matched, not conflicting.
    pub fn new(
        key: CompositeKey,
        occurrence: usize,
        category: impl Into<Category>,
        local_data: PartialRecord,
        remote_data: PartialRecord,
        conflict_fields: BTreeSet<FieldName>,
    ) -> Option<Self> {
        if conflict_fields.is_empty() {
            return None;
        }
        Some(Self {
            key,
            occurrence,
            category: category.into(),
            local_data,
            remote_data,
            conflict_fields,
            resolution: None,
            resolved_data: None,
        })
    }

    /// Diff a matched pair; `None` when the pair agrees.
    ///
    /// The local record's category decides the bucket.
    pub fn from_pair(pair: &MatchedPair, schema: &ComparisonSchema) -> Option<Self> {
        let fields = diff_fields(&pair.local, &pair.remote, schema);
        Self::new(
            pair.key.clone(),
            pair.occurrence,
            pair.local.category_or_default(),
            pair.local.to_partial(),
            pair.remote.to_partial(),
            fields,
        )
    }

    pub fn key(&self) -> &CompositeKey {
        &self.key
    }

    pub fn occurrence(&self) -> usize {
        self.occurrence
    }

    /// Unique address of this conflict within its set.
    pub fn conflict_key(&self) -> ConflictKey {
        ConflictKey::new(self.key.clone(), self.occurrence)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn local_data(&self) -> &PartialRecord {
        &self.local_data
    }

    pub fn remote_data(&self) -> &PartialRecord {
        &self.remote_data
    }

    pub fn conflict_fields(&self) -> &BTreeSet<FieldName> {
        &self.conflict_fields
    }

    pub fn resolution(&self) -> Option<ResolutionKind> {
        self.resolution
    }

    pub fn resolved_data(&self) -> Option<&PartialRecord> {
        self.resolved_data.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Resolve this conflict in place.
    ///
    /// On error the record is left as it was.
    pub fn apply(
        &mut self,
        kind: ResolutionKind,
        manual_override: Option<&PartialRecord>,
        policy: &MergePolicy,
    ) -> Result<()> {
        let data = resolve(self, kind, manual_override, policy)?;
        self.resolution = Some(kind);
        self.resolved_data = Some(data);
        Ok(())
    }

    /// Whether the resolved data differs from what is held locally.
    pub fn changes_local(&self) -> bool {
        self.resolved_data
            .as_ref()
            .is_some_and(|data| data != &self.local_data)
    }

    /// The resolved data as a full record, identity fields restored from the
    /// key when the resolved data omits them.
    pub fn resolved_record(&self) -> Option<PropertyRecord> {
        let data = self.resolved_data.as_ref()?;
        let mut record = PropertyRecord::from_partial(data)
            .unwrap_or_else(|| PropertyRecord {
                nsn: self.key.nsn.clone(),
                serial_number: None,
                category: None,
                fields: data.clone(),
            });
        record.nsn = self.key.nsn.clone();
        record.serial_number = self.key.serial_number.clone();
        if record.category.is_none() && self.category != crate::record::UNCATEGORIZED {
            record.category = Some(self.category.clone());
        }
        record.fields.retain(|name, _| {
            !matches!(
                name.as_str(),
                crate::record::NSN_FIELD
                    | crate::record::SERIAL_NUMBER_FIELD
                    | crate::record::CATEGORY_FIELD
            )
        });
        Some(record)
    }
}

/// Wire shape used to validate incoming conflict records.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictRecordRepr {
    key: CompositeKey,
    #[serde(default)]
    occurrence: usize,
    #[serde(default = "default_category")]
    category: Category,
    local_data: PartialRecord,
    remote_data: PartialRecord,
    conflict_fields: BTreeSet<FieldName>,
    #[serde(default)]
    resolution: Option<ResolutionKind>,
    #[serde(default)]
    resolved_data: Option<PartialRecord>,
}

fn default_category() -> Category {
    crate::record::UNCATEGORIZED.to_string()
}

impl TryFrom<ConflictRecordRepr> for ConflictRecord {
    type Error = Error;

    fn try_from(repr: ConflictRecordRepr) -> Result<Self> {
        if repr.resolution.is_some() != repr.resolved_data.is_some() {
            return Err(Error::InvalidRecord(format!(
                "conflict {}: resolution and resolvedData must be set together",
                repr.key
            )));
        }
        let mut record = Self::new(
            repr.key,
            repr.occurrence,
            repr.category,
            repr.local_data,
            repr.remote_data,
            repr.conflict_fields,
        )
        .ok_or_else(|| Error::InvalidRecord("conflict with no differing fields".into()))?;
        record.resolution = repr.resolution;
        record.resolved_data = repr.resolved_data;
        Ok(record)
    }
}

/// One resolved conflict, as pushed to the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionEntry {
    pub key: ConflictKey,
    pub resolution: ResolutionKind,
    pub resolved_data: PartialRecord,
}

/// The conflicts surfaced by one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictSet {
    conflicts: Vec<ConflictRecord>,
}

impl ConflictSet {
    pub fn new(conflicts: Vec<ConflictRecord>) -> Self {
        Self { conflicts }
    }

    /// Build a set from conflicts computed elsewhere, whose addresses may
    /// collide. A conflict whose address is already taken moves to the next
    /// free occurrence of its key, so every conflict stays addressable.
    pub fn with_unique_keys(conflicts: Vec<ConflictRecord>) -> Self {
        let mut taken: HashSet<ConflictKey> = HashSet::new();
        let conflicts = conflicts
            .into_iter()
            .map(|mut conflict| {
                while !taken.insert(conflict.conflict_key()) {
                    conflict.occurrence += 1;
                }
                conflict
            })
            .collect();
        Self { conflicts }
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.conflicts.iter()
    }

    pub fn as_slice(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn get(&self, key: &ConflictKey) -> Option<&ConflictRecord> {
        self.conflicts
            .iter()
            .find(|c| c.key == key.key && c.occurrence == key.occurrence)
    }

    /// Resolve one conflict.
    pub fn set_resolution(
        &mut self,
        key: &ConflictKey,
        kind: ResolutionKind,
        manual_override: Option<&PartialRecord>,
        policy: &MergePolicy,
    ) -> Result<()> {
        let conflict = self
            .conflicts
            .iter_mut()
            .find(|c| c.key == key.key && c.occurrence == key.occurrence)
            .ok_or_else(|| Error::UnknownConflict(key.clone()))?;
        conflict.apply(kind, manual_override, policy)
    }

    /// Apply one strategy to every unresolved conflict, or to every conflict
    /// when `force` is set. Returns how many conflicts were written.
    ///
    /// `manual` has no per-item data to apply, so it is rejected up front and
    /// nothing is changed.
    pub fn set_resolution_for_all(
        &mut self,
        kind: ResolutionKind,
        force: bool,
        policy: &MergePolicy,
    ) -> Result<usize> {
        if kind == ResolutionKind::Manual {
            return Err(Error::InvalidResolution(
                "manual resolution cannot be applied to all conflicts".into(),
            ));
        }

        let mut written = 0;
        for conflict in self.conflicts.iter_mut() {
            if conflict.is_resolved() && !force {
                continue;
            }
            conflict.apply(kind, None, policy)?;
            written += 1;
        }
        Ok(written)
    }

    pub fn unresolved_count(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_resolved()).count()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.unresolved_count() == 0
    }

    /// Fail with [`Error::IncompleteResolution`] unless every conflict is
    /// resolved.
    pub fn ensure_resolved(&self) -> Result<()> {
        match self.unresolved_count() {
            0 => Ok(()),
            unresolved => Err(Error::IncompleteResolution { unresolved }),
        }
    }

    /// Resolutions ready to be pushed. Unresolved conflicts are skipped.
    pub fn resolutions(&self) -> Vec<ResolutionEntry> {
        self.conflicts
            .iter()
            .filter_map(|c| {
                Some(ResolutionEntry {
                    key: c.conflict_key(),
                    resolution: c.resolution?,
                    resolved_data: c.resolved_data.clone()?,
                })
            })
            .collect()
    }

    /// Resolved records to write through to the local store.
    pub fn resolved_records(&self) -> Vec<PropertyRecord> {
        self.conflicts
            .iter()
            .filter_map(ConflictRecord::resolved_record)
            .collect()
    }

    /// Number of resolved conflicts whose data differs from local.
    pub fn local_changes(&self) -> usize {
        self.conflicts.iter().filter(|c| c.changes_local()).count()
    }
}

impl From<Vec<ConflictRecord>> for ConflictSet {
    fn from(conflicts: Vec<ConflictRecord>) -> Self {
        Self::new(conflicts)
    }
}

impl IntoIterator for ConflictSet {
    type Item = ConflictRecord;
    type IntoIter = std::vec::IntoIter<ConflictRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.conflicts.into_iter()
    }
}
