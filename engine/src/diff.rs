//! Field differencer.

use crate::{ComparisonSchema, FieldName, PropertyRecord};
use std::collections::BTreeSet;

/// Names of the comparison fields whose normalized values differ.
///
/// Fields outside the schema are never reported. An empty set means the
/// pair is in agreement.
pub fn diff_fields(
    local: &PropertyRecord,
    remote: &PropertyRecord,
    schema: &ComparisonSchema,
) -> BTreeSet<FieldName> {
    schema
        .fields
        .iter()
        .filter(|field| !field.values_equal(local.get(&field.name), remote.get(&field.name)))
        .map(|field| field.name.clone())
        .collect()
}

/// Number of differing comparison fields, without allocating the set.
pub fn diff_count(local: &PropertyRecord, remote: &PropertyRecord, schema: &ComparisonSchema) -> usize {
    schema
        .fields
        .iter()
        .filter(|field| !field.values_equal(local.get(&field.name), remote.get(&field.name)))
        .count()
}
