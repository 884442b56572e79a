//! Database operations for the property_records table.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tally_engine::PropertyRecord;
use tally_session::{validate_writes, Placement, PropertyStore, StoreError, StoreWrite};

/// A stored property row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    #[allow(dead_code)]
    pub id: i64,
    pub nsn: String,
    /// Empty for bulk stock
    pub serial_number: String,
    /// Orders rows sharing the key; the n-th row is occurrence n
    pub position: i32,
    pub category: Option<String>,
    pub fields: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            id: row.try_get("id")?,
            nsn: row.try_get("nsn")?,
            serial_number: row.try_get("serial_number")?,
            position: row.try_get("position")?,
            category: row.try_get("category")?,
            fields: row.try_get("fields")?,
        })
    }
}

impl StoredRecord {
    /// Convert a database row to a property record.
    pub fn to_record(&self) -> PropertyRecord {
        let fields = match &self.fields {
            serde_json::Value::Object(map) => map.clone(),
            _ => Default::default(),
        };

        PropertyRecord {
            nsn: self.nsn.clone(),
            serial_number: Some(self.serial_number.clone()).filter(|s| !s.is_empty()),
            category: self.category.clone(),
            fields,
        }
    }
}

/// Position of the `occurrence`-th row with the record's key, if any.
pub async fn occurrence_position(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
    occurrence: usize,
) -> Result<Option<i32>, sqlx::Error> {
    let key = record.key();
    let row = sqlx::query(
        r#"
        SELECT position
        FROM property_records
        WHERE nsn = $1 AND serial_number = $2
        ORDER BY position
        OFFSET $3
        LIMIT 1
        "#,
    )
    .bind(&key.nsn)
    .bind(key.serial_number.as_deref().unwrap_or(""))
    .bind(occurrence as i64)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|row| row.try_get("position")).transpose()
}

/// Overwrite the row at `position` within the record's key.
pub async fn update_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
    position: i32,
) -> Result<(), sqlx::Error> {
    let key = record.key();

    sqlx::query(
        r#"
        UPDATE property_records
        SET category = $4, fields = $5, updated_at = NOW()
        WHERE nsn = $1 AND serial_number = $2 AND position = $3
        "#,
    )
    .bind(&key.nsn)
    .bind(key.serial_number.as_deref().unwrap_or(""))
    .bind(position)
    .bind(&record.category)
    .bind(serde_json::Value::Object(record.fields.clone()))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Insert a record after every existing row with its key.
pub async fn append_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &PropertyRecord,
) -> Result<(), sqlx::Error> {
    let key = record.key();

    sqlx::query(
        r#"
        INSERT INTO property_records (nsn, serial_number, position, category, fields, updated_at)
        SELECT $1, $2, COALESCE(MAX(position) + 1, 0), $3, $4, NOW()
        FROM property_records
        WHERE nsn = $1 AND serial_number = $2
        "#,
    )
    .bind(&key.nsn)
    .bind(key.serial_number.as_deref().unwrap_or(""))
    .bind(&record.category)
    .bind(serde_json::Value::Object(record.fields.clone()))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Get every stored record, rows sharing a key in position order.
pub async fn get_all_records(pool: &PgPool) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, nsn, serial_number, position, category, fields
        FROM property_records
        ORDER BY nsn, serial_number, position
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Count stored records.
pub async fn count_records(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM property_records")
        .fetch_one(pool)
        .await?;
    row.try_get("count")
}

/// Replacements first, so they resolve against the rows stored before the
/// batch; appends keep their batch order.
pub fn write_order(writes: &[StoreWrite]) -> Vec<&StoreWrite> {
    let (mut ordered, appends): (Vec<_>, Vec<_>) = writes
        .iter()
        .partition(|w| matches!(w.placement, Placement::Occurrence(_)));
    ordered.extend(appends);
    ordered
}

/// [`PropertyStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgPropertyStore {
    pool: PgPool,
}

impl PgPropertyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl PropertyStore for PgPropertyStore {
    async fn load_all(&self) -> Result<Vec<PropertyRecord>, StoreError> {
        let rows = get_all_records(&self.pool).await.map_err(unavailable)?;
        Ok(rows.iter().map(StoredRecord::to_record).collect())
    }

    async fn write_resolved(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        validate_writes(writes)?;

        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for write in write_order(writes) {
            let record = &write.record;
            let position = match write.placement {
                Placement::Occurrence(occurrence) => occurrence_position(&mut tx, record, occurrence).await,
                Placement::Append => Ok(None),
            };
            let written = match position {
                Ok(Some(position)) => update_record(&mut tx, record, position).await,
                Ok(None) => append_record(&mut tx, record).await,
                Err(e) => Err(e),
            };
            written.map_err(|e| StoreError::Rejected {
                key: record.key(),
                reason: e.to_string(),
            })?;
        }
        tx.commit().await.map_err(unavailable)?;

        tracing::debug!(written = writes.len(), "Wrote records to database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_engine::CompositeKey;

    #[test]
    fn replacements_are_applied_before_appends() {
        let writes = vec![
            StoreWrite::append(PropertyRecord::new("N").with_field("location", "Bay 3")),
            StoreWrite::replace(PropertyRecord::new("N").with_field("location", "Bay 2"), 1),
            StoreWrite::append(PropertyRecord::new("M")),
            StoreWrite::replace(PropertyRecord::new("A").with_serial("1"), 0),
        ];

        let placements: Vec<_> = write_order(&writes).iter().map(|w| w.placement).collect();
        assert_eq!(
            placements,
            vec![
                Placement::Occurrence(1),
                Placement::Occurrence(0),
                Placement::Append,
                Placement::Append,
            ]
        );
        assert_eq!(write_order(&writes)[2].record.get("location"), Some(&serde_json::json!("Bay 3")));
    }

    #[test]
    fn row_to_record() {
        let row = StoredRecord {
            id: 1,
            nsn: "1005-01-123-4567".into(),
            serial_number: String::new(),
            position: 0,
            category: Some("weapons".into()),
            fields: serde_json::json!({"status": "FMC"}),
        };

        let record = row.to_record();
        assert_eq!(record.key(), CompositeKey::bulk("1005-01-123-4567"));
        assert_eq!(record.category.as_deref(), Some("weapons"));
        assert_eq!(record.get("status"), Some(&serde_json::json!("FMC")));
    }
}
