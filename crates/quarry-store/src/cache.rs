//! `SQLite`-backed embedding cache keyed by content fingerprint.
//!
//! A cache hit means the exact normalized text was embedded before, so the
//! external embedding call is skipped entirely. Rows are only ever read
//! back under the fingerprint they were written with, which keeps stale
//! vectors from being served after content changes.

use sqlx::SqlitePool;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    pool: SqlitePool,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the cache table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embedding_cache (\
                 fingerprint TEXT NOT NULL,\
                 model TEXT NOT NULL,\
                 dimension INTEGER NOT NULL,\
                 vector TEXT NOT NULL,\
                 PRIMARY KEY (fingerprint, model)\
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a cached vector.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a stored row fails its dimension check.
    pub async fn get(&self, fingerprint: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT dimension, vector FROM embedding_cache WHERE fingerprint = ? AND model = ?",
        )
        .bind(fingerprint)
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;

        let Some((dimension, encoded)) = row else {
            return Ok(None);
        };

        let vector: Vec<f32> = serde_json::from_str(&encoded)?;
        if i64::try_from(vector.len())? != dimension {
            return Err(StoreError::Corrupt(format!(
                "cached vector for {fingerprint} has {} dims, row says {dimension}",
                vector.len()
            )));
        }
        Ok(Some(vector))
    }

    /// Store a vector under its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails.
    pub async fn put(&self, fingerprint: &str, model: &str, vector: &[f32]) -> Result<()> {
        let encoded = serde_json::to_string(vector)?;
        sqlx::query(
            "INSERT OR REPLACE INTO embedding_cache (fingerprint, model, dimension, vector) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(fingerprint)
        .bind(model)
        .bind(i64::try_from(vector.len())?)
        .bind(encoded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of cached vectors across all models.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn len(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(row.0)?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
