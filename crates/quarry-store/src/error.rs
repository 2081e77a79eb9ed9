//! Error types for quarry-store.

/// Errors from index, cache, and ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Qdrant vector store error.
    #[error("Qdrant error: {0}")]
    Qdrant(#[from] Box<qdrant_client::QdrantError>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisted row that fails its own invariants.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),
}

/// Result type alias using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;
