//! SQLite pool setup and schema.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS drugs (
        id TEXT PRIMARY KEY,
        category_id TEXT,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pharmacies (
        id TEXT PRIMARY KEY,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        status TEXT NOT NULL,
        service_radius_km REAL
    )",
    "CREATE TABLE IF NOT EXISTS inventory_records (
        pharmacy_id TEXT NOT NULL,
        drug_id TEXT NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity >= 0),
        price TEXT NOT NULL,
        cost_price TEXT,
        expiry_date TEXT,
        reorder_threshold INTEGER NOT NULL,
        last_updated TEXT NOT NULL,
        PRIMARY KEY (pharmacy_id, drug_id)
    )",
    "CREATE TABLE IF NOT EXISTS price_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pharmacy_id TEXT NOT NULL,
        drug_id TEXT NOT NULL,
        price TEXT NOT NULL,
        previous_price TEXT,
        reason TEXT,
        changed_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_price_history_key
        ON price_history (pharmacy_id, drug_id, changed_at)",
    "CREATE TABLE IF NOT EXISTS alerts (
        id TEXT PRIMARY KEY,
        pharmacy_id TEXT NOT NULL,
        drug_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        raised_at TEXT NOT NULL,
        resolved_at TEXT,
        trigger_value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rating_aggregates (
        pharmacy_id TEXT PRIMARY KEY,
        mean REAL NOT NULL,
        count INTEGER NOT NULL,
        sum REAL NOT NULL,
        updated_at TEXT
    )",
];

/// Open a pool for `database_url` and make sure the schema exists.
///
/// In-memory databases are per-connection in SQLite, so those pools are
/// pinned to a single connection.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    tracing::debug!("Database schema ready at {}", database_url);
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn memory_pool_has_every_table() {
        let pool = create_pool("sqlite::memory:").await.unwrap();

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();

        for table in [
            "alerts",
            "drugs",
            "inventory_records",
            "pharmacies",
            "price_history",
            "rating_aggregates",
        ] {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
    }
}
