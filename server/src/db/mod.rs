//! PostgreSQL persistence for the local property view.

mod records;

pub use records::*;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Errors while bringing the database up.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Connect, apply pending migrations and wrap the pool in a store.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPropertyStore, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    tracing::info!("Running database migrations...");
    migrate(&pool).await?;

    let stored = count_records(&pool).await?;
    tracing::info!(records = stored, "Property store ready");

    Ok(PgPropertyStore::new(pool))
}

async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
