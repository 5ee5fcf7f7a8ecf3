use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::domain::Entry;

use super::MIGRATION_001_INITIAL;

/// Name of the collection row holding the entry list.
const ENTRIES_COLLECTION: &str = "entries";

/// Persistence surface for the entry collection. The contract is a bare
/// whole-collection load/save against a single named key: `load` returns the
/// most recently saved collection (or empty when nothing has ever been
/// saved), `save` replaces it wholesale.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given path.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Load the full entry collection. An absent key is an empty collection;
    /// a malformed payload is an error, never partial data.
    pub async fn load(&self) -> Result<Vec<Entry>> {
        let row = sqlx::query("SELECT payload FROM collections WHERE name = ?")
            .bind(ENTRIES_COLLECTION)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load entry collection")?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                serde_json::from_str(&payload).context("Malformed entry collection payload")
            }
            None => Ok(Vec::new()),
        }
    }

    /// Save the full entry collection, replacing the previous value.
    pub async fn save(&self, entries: &[Entry]) -> Result<()> {
        let payload =
            serde_json::to_string(entries).context("Failed to serialize entry collection")?;

        sqlx::query(
            r#"
            INSERT INTO collections (name, payload)
            VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(ENTRIES_COLLECTION)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .context("Failed to save entry collection")?;

        Ok(())
    }
}
