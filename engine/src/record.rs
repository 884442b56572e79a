//! Property record types.

use crate::{Category, CompositeKey, Nsn};
use serde::{Deserialize, Serialize};

/// A partial view of a record: a JSON object keyed by field name.
pub type PartialRecord = serde_json::Map<String, serde_json::Value>;

/// Bucket name for records that carry no category.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Wire names of the identity fields inside a [`PartialRecord`].
pub const NSN_FIELD: &str = "nsn";
pub const SERIAL_NUMBER_FIELD: &str = "serialNumber";
pub const CATEGORY_FIELD: &str = "category";

/// A property record as read from one of the two sides.
///
/// Records are value snapshots: the engine never mutates one after reading
/// it. Comparable attributes (`nomenclature`, `location`, `status`,
/// `quantityOnHand`, ...) live in `fields` and are flattened into the same
/// JSON object as the identity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    /// National stock number
    pub nsn: Nsn,
    /// Serial number, absent for bulk stock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Category used for summary buckets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// All other attributes
    #[serde(flatten)]
    pub fields: PartialRecord,
}

impl PropertyRecord {
    /// Create a record with no attributes.
    pub fn new(nsn: impl Into<Nsn>) -> Self {
        Self {
            nsn: nsn.into(),
            serial_number: None,
            category: None,
            fields: PartialRecord::new(),
        }
    }

    /// Builder-style serial number.
    pub fn with_serial(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Builder-style category.
    pub fn with_category(mut self, category: impl Into<Category>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Builder-style attribute.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// The composite identity key.
    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.nsn.clone(), self.serial_number.clone())
    }

    /// The summary bucket this record counts toward.
    pub fn category_or_default(&self) -> &str {
        self.category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(UNCATEGORIZED)
    }

    /// Get an attribute by name.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Flatten into a partial record, identity fields included.
    pub fn to_partial(&self) -> PartialRecord {
        let mut partial = PartialRecord::new();
        partial.insert(NSN_FIELD.to_string(), self.nsn.clone().into());
        if let Some(serial) = &self.serial_number {
            partial.insert(SERIAL_NUMBER_FIELD.to_string(), serial.clone().into());
        }
        if let Some(category) = &self.category {
            partial.insert(CATEGORY_FIELD.to_string(), category.clone().into());
        }
        for (name, value) in &self.fields {
            partial.insert(name.clone(), value.clone());
        }
        partial
    }

    /// Rebuild a record from a partial view.
    ///
    /// Returns `None` when the partial has no usable stock number.
    pub fn from_partial(partial: &PartialRecord) -> Option<Self> {
        let nsn = partial
            .get(NSN_FIELD)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())?
            .to_string();
        let text = |field: &str| {
            partial
                .get(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let fields = partial
            .iter()
            .filter(|(name, _)| {
                !matches!(
                    name.as_str(),
                    NSN_FIELD | SERIAL_NUMBER_FIELD | CATEGORY_FIELD
                )
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Some(Self {
            nsn,
            serial_number: text(SERIAL_NUMBER_FIELD),
            category: text(CATEGORY_FIELD),
            fields,
        })
    }
}
