//! Cache-first batched embedding.

use std::sync::Arc;

use quarry_llm::{LlmError, LlmProvider};
use quarry_store::EmbeddingCache;
use tokio::sync::Semaphore;

use crate::chunker::Chunk;
use crate::context::contextualize_for_embedding;
use crate::error::Result;
use crate::fingerprint;

/// Embedder configuration.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Texts per call to the embedding service.
    pub batch_size: usize,
    /// Concurrent in-flight embedding calls across all files.
    pub max_concurrency: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_concurrency: 2,
        }
    }
}

/// Turns chunks into vectors, skipping the external service for any
/// fingerprint already in the cache.
pub struct Embedder<P: LlmProvider> {
    provider: Arc<P>,
    cache: Option<EmbeddingCache>,
    semaphore: Arc<Semaphore>,
    config: EmbedderConfig,
}

impl<P: LlmProvider> Embedder<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, cache: Option<EmbeddingCache>, config: EmbedderConfig) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            provider,
            cache,
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// One vector per chunk, in chunk order.
    ///
    /// Cache hits never reach the service; misses go out in batches
    /// bounded by the shared concurrency limit, and land in the cache
    /// keyed by the chunk fingerprint.
    ///
    /// # Errors
    ///
    /// Propagates `ServiceUnavailable` and the other provider failures;
    /// already-cached vectors are unaffected by a failed batch.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        let mut misses: Vec<usize> = Vec::new();

        if let Some(cache) = &self.cache {
            for (i, chunk) in chunks.iter().enumerate() {
                match cache.get(&chunk.fingerprint, self.provider.name()).await? {
                    Some(vector) => vectors[i] = Some(vector),
                    None => misses.push(i),
                }
            }
        } else {
            misses.extend(0..chunks.len());
        }

        let cache_hits = chunks.len() - misses.len();
        if cache_hits > 0 {
            tracing::debug!(cache_hits, misses = misses.len(), "embedding cache consulted");
        }

        for batch in misses.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch
                .iter()
                .map(|&i| contextualize_for_embedding(&chunks[i]))
                .collect();
            let fresh = self.embed_texts(&texts).await?;

            for (&i, vector) in batch.iter().zip(fresh) {
                if let Some(cache) = &self.cache {
                    cache
                        .put(&chunks[i].fingerprint, self.provider.name(), &vector)
                        .await?;
                }
                vectors[i] = Some(vector);
            }
        }

        vectors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                crate::error::IndexError::Consistency("embedding batch left a chunk unfilled".into())
            })
    }

    /// Embed a bare query string, cached under the query text's own
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let digest = fingerprint::fingerprint(query);
        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get(&digest, self.provider.name()).await? {
                return Ok(vector);
            }
        }

        let mut vectors = self.embed_texts(&[query.to_owned()]).await?;
        let vector = vectors
            .pop()
            .ok_or(LlmError::EmptyResponse { provider: "embed" })?;
        if let Some(cache) = &self.cache {
            cache.put(&digest, self.provider.name(), &vector).await?;
        }
        Ok(vector)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::Backend("embedding limiter closed".into()))?;
        let vectors = self.provider.embed_batch(texts).await?;
        if vectors.len() != texts.len() {
            return Err(LlmError::EmptyResponse { provider: "embed" }.into());
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use quarry_llm::mock::MockProvider;
    use sqlx::SqlitePool;

    use super::*;
    use crate::chunker::{ChunkerConfig, chunk_source};
    use crate::languages::Lang;

    async fn cache() -> EmbeddingCache {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let cache = EmbeddingCache::new(pool);
        cache.migrate().await.unwrap();
        cache
    }

    fn chunks() -> Vec<Chunk> {
        let source = "fn alpha() { 1 }\n\nfn beta() { 2 }\n";
        chunk_source("src/lib.rs", source, Lang::Rust, &ChunkerConfig::default()).chunks
    }

    #[tokio::test]
    async fn embeds_one_vector_per_chunk() {
        let provider = Arc::new(MockProvider::default());
        let embedder = Embedder::new(provider, None, EmbedderConfig::default());
        let chunks = chunks();
        let vectors = embedder.embed_chunks(&chunks).await.unwrap();
        assert_eq!(vectors.len(), chunks.len());
    }

    #[tokio::test]
    async fn second_pass_is_all_cache_hits() {
        let provider = Arc::new(MockProvider::default());
        let embedder = Embedder::new(
            Arc::clone(&provider),
            Some(cache().await),
            EmbedderConfig::default(),
        );
        let chunks = chunks();

        let first = embedder.embed_chunks(&chunks).await.unwrap();
        let calls_after_first = provider.embed_calls();
        assert!(calls_after_first > 0);

        let second = embedder.embed_chunks(&chunks).await.unwrap();
        assert_eq!(provider.embed_calls(), calls_after_first);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn batches_respect_batch_size() {
        let provider = Arc::new(MockProvider::default());
        let embedder = Embedder::new(
            Arc::clone(&provider),
            None,
            EmbedderConfig {
                batch_size: 1,
                max_concurrency: 2,
            },
        );
        let chunks = chunks();
        embedder.embed_chunks(&chunks).await.unwrap();
        assert_eq!(provider.embed_calls(), chunks.len());
    }

    #[tokio::test]
    async fn service_failure_propagates() {
        let provider = Arc::new(MockProvider::failing_embed());
        let embedder = Embedder::new(provider, Some(cache().await), EmbedderConfig::default());
        let result = embedder.embed_chunks(&chunks()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn query_embedding_is_cached() {
        let provider = Arc::new(MockProvider::default());
        let embedder = Embedder::new(
            Arc::clone(&provider),
            Some(cache().await),
            EmbedderConfig::default(),
        );

        let first = embedder.embed_query("where is auth handled").await.unwrap();
        let second = embedder.embed_query("where is auth handled").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.embed_calls(), 1);
    }

    #[tokio::test]
    async fn identical_chunks_share_cache_entry() {
        let provider = Arc::new(MockProvider::default());
        let shared = cache().await;
        let embedder = Embedder::new(
            Arc::clone(&provider),
            Some(shared.clone()),
            EmbedderConfig::default(),
        );

        // Same content under two paths: the second file's chunk is a
        // fingerprint-level duplicate and must not re-embed.
        let a = chunk_source("a.rs", "fn same() { 0 }\n", Lang::Rust, &ChunkerConfig::default());
        let b = chunk_source("b.rs", "fn same() { 0 }\n", Lang::Rust, &ChunkerConfig::default());

        embedder.embed_chunks(&a.chunks).await.unwrap();
        let calls = provider.embed_calls();
        embedder.embed_chunks(&b.chunks).await.unwrap();
        assert_eq!(provider.embed_calls(), calls);
    }
}
