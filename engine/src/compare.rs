//! Comparison schema and normalized field equality.
//!
//! Only the fields listed in a [`ComparisonSchema`] take part in diffing;
//! internal bookkeeping fields are ignored. Each field is compared after
//! normalization according to its [`FieldKind`].

use crate::FieldName;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a comparison field is normalized before equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Trimmed, case-insensitive string
    Text,
    /// Numeric equality with zero tolerance
    Number,
    /// Calendar-day equality
    Date,
    /// Plain JSON equality
    Exact,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Text => write!(f, "Text"),
            FieldKind::Number => write!(f, "Number"),
            FieldKind::Date => write!(f, "Date"),
            FieldKind::Exact => write!(f, "Exact"),
        }
    }
}

/// A field that participates in diffing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonField {
    /// Field name on the wire
    pub name: FieldName,
    /// Normalization applied before comparing
    pub kind: FieldKind,
}

impl ComparisonField {
    pub fn new(name: impl Into<FieldName>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn text(name: impl Into<FieldName>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn number(name: impl Into<FieldName>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn date(name: impl Into<FieldName>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    /// Whether two raw values are equal after normalization.
    ///
    /// A missing value and `null` are equal. Values that cannot be
    /// normalized for this kind fall back to plain JSON equality.
    pub fn values_equal(&self, local: Option<&Value>, remote: Option<&Value>) -> bool {
        let local = local.filter(|v| !v.is_null());
        let remote = remote.filter(|v| !v.is_null());

        match (local, remote) {
            (None, None) => true,
            (Some(_), None) | (None, Some(_)) => false,
            (Some(a), Some(b)) => match self.kind {
                FieldKind::Text => match (as_text(a), as_text(b)) {
                    (Some(a), Some(b)) => a == b,
                    _ => a == b,
                },
                FieldKind::Number => match (as_number(a), as_number(b)) {
                    (Some(a), Some(b)) => a == b,
                    _ => a == b,
                },
                FieldKind::Date => match (as_day(a), as_day(b)) {
                    (Some(a), Some(b)) => a == b,
                    _ => a == b,
                },
                FieldKind::Exact => a == b,
            },
        }
    }
}

/// The list of fields that are sync-relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSchema {
    pub fields: Vec<ComparisonField>,
}

impl ComparisonSchema {
    /// Create a schema from an explicit field list.
    pub fn new(fields: Vec<ComparisonField>) -> Self {
        Self { fields }
    }

    /// Builder-style method to add a field.
    pub fn with_field(mut self, field: ComparisonField) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    /// Get a field definition by name.
    pub fn get_field(&self, name: &str) -> Option<&ComparisonField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of all comparison fields, in schema order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl Default for ComparisonSchema {
    fn default() -> Self {
        Self::new(vec![
            ComparisonField::text("nomenclature"),
            ComparisonField::text("location"),
            ComparisonField::text("status"),
            ComparisonField::number("quantityOnHand"),
            ComparisonField::text("condition"),
            ComparisonField::date("lastInventoried"),
        ])
    }
}

fn as_text(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.trim().to_lowercase())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_day(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(date);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).date_naive())
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.date_naive()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_is_case_insensitive_and_trimmed() {
        let field = ComparisonField::text("location");
        assert!(field.values_equal(Some(&json!("Arms Room")), Some(&json!(" arms room "))));
        assert!(!field.values_equal(Some(&json!("Arms Room")), Some(&json!("Motor Pool"))));
    }

    #[test]
    fn missing_equals_null() {
        let field = ComparisonField::text("status");
        assert!(field.values_equal(None, Some(&Value::Null)));
        assert!(!field.values_equal(None, Some(&json!("FMC"))));
    }

    #[test]
    fn number_has_zero_tolerance() {
        let field = ComparisonField::number("quantityOnHand");
        assert!(field.values_equal(Some(&json!(4)), Some(&json!(4.0))));
        assert!(field.values_equal(Some(&json!("4")), Some(&json!(4))));
        assert!(!field.values_equal(Some(&json!(4)), Some(&json!(4.0001))));
    }

    #[test]
    fn date_compares_by_day() {
        let field = ComparisonField::date("lastInventoried");
        assert!(field.values_equal(
            Some(&json!("2024-03-01")),
            Some(&json!("2024-03-01T17:45:00Z"))
        ));
        // 2024-03-01T00:00:00Z in milliseconds
        assert!(field.values_equal(Some(&json!(1709251200000i64)), Some(&json!("2024-03-01"))));
        assert!(!field.values_equal(Some(&json!("2024-03-01")), Some(&json!("2024-03-02"))));
    }

    #[test]
    fn unparseable_falls_back_to_exact() {
        let field = ComparisonField::date("lastInventoried");
        assert!(field.values_equal(Some(&json!("unknown")), Some(&json!("unknown"))));
        assert!(!field.values_equal(Some(&json!("unknown")), Some(&json!("UNKNOWN"))));
    }

    #[test]
    fn with_field_replaces_existing() {
        let schema = ComparisonSchema::default().with_field(ComparisonField::new(
            "status",
            FieldKind::Exact,
        ));
        assert_eq!(
            schema.get_field("status").map(|f| f.kind),
            Some(FieldKind::Exact)
        );
        assert_eq!(schema.field_names().filter(|n| *n == "status").count(), 1);
    }
}
