use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;

use crate::error::{LlmError, Result};
use crate::provider::LlmProvider;

/// Upper bound on a single embedding input, in characters.
///
/// Ollama truncates silently past the model context; rejecting up front
/// keeps the "one vector per chunk of this exact text" contract honest.
const DEFAULT_MAX_EMBED_CHARS: usize = 32_768;

/// Ollama-backed provider for embeddings and generation.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_embed_chars: usize,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
            temperature: 0.1,
            max_embed_chars: DEFAULT_MAX_EMBED_CHARS,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_embed_chars(mut self, limit: usize) -> Self {
        self.max_embed_chars = limit;
        self
    }

    /// Check that Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns `ServiceUnavailable` if the connection fails.
    pub async fn health_check(&self) -> Result<()> {
        self.client.list_local_models().await.map_err(|e| {
            LlmError::ServiceUnavailable(format!("failed to connect to Ollama — is it running? {e}"))
        })?;
        Ok(())
    }
}

impl LlmProvider for OllamaProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            let chars = text.chars().count();
            if chars > self.max_embed_chars {
                return Err(LlmError::InputTooLong {
                    chars,
                    limit: self.max_embed_chars,
                });
            }
        }

        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::from(texts.to_vec()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| classify_backend_error("embedding", &e.to_string()))?;

        if response.embeddings.len() != texts.len() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }
        Ok(response.embeddings)
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let options = ModelOptions::default()
            .temperature(self.temperature)
            .num_predict(i32::try_from(max_tokens).unwrap_or(i32::MAX));

        let request =
            ChatMessageRequest::new(self.model.clone(), vec![ChatMessage::user(prompt.to_owned())])
                .options(options);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| classify_backend_error("chat", &e.to_string()))?;

        let content = response.message.content;
        if content.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

/// Map an Ollama failure message onto the error taxonomy.
fn classify_backend_error(op: &str, message: &str) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("connection refused")
        || lower.contains("error trying to connect")
        || lower.contains("connection reset")
        || lower.contains("dns error")
    {
        LlmError::ServiceUnavailable(format!("Ollama {op} request failed: {message}"))
    } else if lower.contains("not found") || lower.contains("try pulling it first") {
        LlmError::ModelNotLoaded(message.to_owned())
    } else if lower.contains("context length") || lower.contains("exceeds the available context") {
        LlmError::ContextLengthExceeded
    } else if lower.contains("timed out") || lower.contains("timeout") {
        LlmError::Timeout
    } else {
        LlmError::Backend(format!("Ollama {op} request failed: {message}"))
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':')
        && let Ok(port) = url[colon_pos + 1..].parse::<u16>()
    {
        return (url[..colon_pos].to_string(), port);
    }
    (url.to_string(), 11434)
}
