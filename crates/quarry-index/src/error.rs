//! Error types for quarry-index.

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Embedding or generation backend failure.
    #[error("LLM error: {0}")]
    Llm(#[from] quarry_llm::LlmError),

    /// Vector index, cache, or ledger failure.
    #[error("store error: {0}")]
    Store(#[from] quarry_store::StoreError),

    /// IO error reading a source file for re-slicing.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant failure. Fatal for the operation that hit it.
    #[error("index consistency violation: {0}")]
    Consistency(String),

    /// Generation did not complete within the configured deadline.
    #[error("generation timed out")]
    GenerationTimeout,
}

impl quarry_llm::retry::Retryable for IndexError {
    /// Only backend outages are worth retrying; store and consistency
    /// failures are not transient.
    fn is_transient(&self) -> bool {
        matches!(self, Self::Llm(e) if e.is_transient())
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use quarry_llm::retry::Retryable;

    use super::*;

    #[test]
    fn transient_llm_errors_bubble_through() {
        let err = IndexError::Llm(quarry_llm::LlmError::ServiceUnavailable("down".into()));
        assert!(err.is_transient());
    }

    #[test]
    fn consistency_and_store_errors_are_final() {
        assert!(!IndexError::Consistency("count mismatch".into()).is_transient());
        assert!(!IndexError::GenerationTimeout.is_transient());
        let err = IndexError::Llm(quarry_llm::LlmError::ContextLengthExceeded);
        assert!(!err.is_transient());
    }
}
