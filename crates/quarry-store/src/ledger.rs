//! Versioned file ledger: which files are indexed, under which fingerprint.
//!
//! One row per indexed file, keyed by path and carrying the whole-file
//! fingerprint. Change detection compares fingerprints, never modification
//! timestamps. The ledger is what makes incremental indexing resumable and
//! auditable.

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;

use crate::error::Result;

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub file_path: String,
    pub fingerprint: String,
    pub chunk_count: usize,
    pub indexed_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct FileLedger {
    pool: SqlitePool,
}

impl FileLedger {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the ledger table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file_ledger (\
                 file_path TEXT PRIMARY KEY,\
                 fingerprint TEXT NOT NULL,\
                 chunk_count INTEGER NOT NULL,\
                 indexed_at_ms INTEGER NOT NULL\
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a committed file version, replacing any previous row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record(&self, file_path: &str, fingerprint: &str, chunk_count: usize) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO file_ledger (file_path, fingerprint, chunk_count, indexed_at_ms) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(file_path)
        .bind(fingerprint)
        .bind(i64::try_from(chunk_count)?)
        .bind(epoch_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Last committed version of a file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn lookup(&self, file_path: &str) -> Result<Option<LedgerRow>> {
        let row: Option<(String, i64, i64)> = sqlx::query_as(
            "SELECT fingerprint, chunk_count, indexed_at_ms FROM file_ledger WHERE file_path = ?",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(fingerprint, chunk_count, indexed_at_ms)| {
            Ok(LedgerRow {
                file_path: file_path.to_owned(),
                fingerprint,
                chunk_count: usize::try_from(chunk_count)?,
                indexed_at_ms,
            })
        })
        .transpose()
    }

    /// Drop the row for a removed file. Missing rows are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn remove(&self, file_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_ledger WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every committed row, ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn all(&self) -> Result<Vec<LedgerRow>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT file_path, fingerprint, chunk_count, indexed_at_ms \
             FROM file_ledger ORDER BY file_path",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(file_path, fingerprint, chunk_count, indexed_at_ms)| {
                Ok(LedgerRow {
                    file_path,
                    fingerprint,
                    chunk_count: usize::try_from(chunk_count)?,
                    indexed_at_ms,
                })
            })
            .collect()
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
