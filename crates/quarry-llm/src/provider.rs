use std::future::Future;

use crate::error::Result;

/// Contract surface for the external embedding and generation services.
///
/// Both operations talk to models the pipeline does not own: the provider
/// is the only place where their wire protocols appear.
pub trait LlmProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LlmError::ServiceUnavailable`] when the backend is
    /// unreachable and [`crate::LlmError::InputTooLong`] when a text exceeds
    /// the model input limit.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;

    /// Generate a completion for `prompt`, bounded by `max_tokens`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LlmError::ModelNotLoaded`],
    /// [`crate::LlmError::ContextLengthExceeded`] or
    /// [`crate::LlmError::Timeout`] depending on how the backend fails.
    fn generate(&self, prompt: &str, max_tokens: u32) -> impl Future<Output = Result<String>> + Send;

    fn name(&self) -> &'static str;
}
