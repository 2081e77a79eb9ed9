//! Error types for quarry-llm.

/// Failures surfaced by embedding and generation backends.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Backend unreachable or refusing connections.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Input exceeds what the embedding model accepts.
    #[error("input of {chars} chars exceeds the embedding limit of {limit}")]
    InputTooLong { chars: usize, limit: usize },

    /// Requested model is not present on the backend.
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Prompt does not fit the model context window.
    #[error("prompt exceeds the model context window")]
    ContextLengthExceeded,

    /// Generation did not finish within the configured deadline.
    #[error("generation timed out")]
    Timeout,

    /// Backend answered but produced no usable content.
    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

impl LlmError {
    /// Whether a retry with backoff can reasonably succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::Timeout)
    }
}

/// Result type alias using `LlmError`.
pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_unavailable_is_transient() {
        assert!(LlmError::ServiceUnavailable("down".into()).is_transient());
        assert!(LlmError::Timeout.is_transient());
    }

    #[test]
    fn contract_errors_are_not_transient() {
        assert!(
            !LlmError::InputTooLong {
                chars: 10,
                limit: 5
            }
            .is_transient()
        );
        assert!(!LlmError::ModelNotLoaded("m".into()).is_transient());
        assert!(!LlmError::ContextLengthExceeded.is_transient());
    }

    #[test]
    fn display_includes_limit() {
        let err = LlmError::InputTooLong {
            chars: 9000,
            limit: 8192,
        };
        assert!(err.to_string().contains("8192"));
    }
}
