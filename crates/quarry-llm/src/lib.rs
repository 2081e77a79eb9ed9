//! Provider abstraction over the external embedding and generation services.

pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;
pub mod retry;

pub use error::{LlmError, Result};
pub use provider::LlmProvider;
