//! Test-only scripted provider.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{LlmError, Result};
use crate::provider::LlmProvider;

/// Deterministic provider for tests.
///
/// Embeddings are bag-of-words histograms hashed into a fixed number of
/// buckets, so texts sharing vocabulary score high cosine similarity and
/// identical texts embed identically. Responses drain a scripted queue.
#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub dimension: usize,
    pub fail_embed: bool,
    pub fail_generate: bool,
    /// Milliseconds to sleep before answering a generate call.
    pub generate_delay_ms: u64,
    embed_calls: Arc<AtomicUsize>,
    generate_calls: Arc<AtomicUsize>,
    /// Number of leading embed calls that fail transiently.
    transient_embed_failures: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock answer".into(),
            dimension: 64,
            fail_embed: false,
            fail_generate: false,
            generate_delay_ms: 0,
            embed_calls: Arc::new(AtomicUsize::new(0)),
            generate_calls: Arc::new(AtomicUsize::new(0)),
            transient_embed_failures: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_embed() -> Self {
        Self {
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_generate() -> Self {
        Self {
            fail_generate: true,
            ..Self::default()
        }
    }

    /// Fail the first `n` embed calls with `ServiceUnavailable`, then recover.
    #[must_use]
    pub fn with_transient_embed_failures(self, n: usize) -> Self {
        self.transient_embed_failures.store(n, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn with_generate_delay(mut self, ms: u64) -> Self {
        self.generate_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            #[expect(clippy::cast_possible_truncation)]
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl LlmProvider for MockProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            return Err(LlmError::ServiceUnavailable("mock embed failure".into()));
        }
        let remaining = self.transient_embed_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_embed_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(LlmError::ServiceUnavailable(
                "mock transient embed failure".into(),
            ));
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_generate {
            return Err(LlmError::ServiceUnavailable("mock generate failure".into()));
        }
        if self.generate_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.generate_delay_ms)).await;
        }
        let mut responses = self.responses.lock().map_err(|_| {
            LlmError::Backend("mock response queue poisoned".into())
        })?;
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
