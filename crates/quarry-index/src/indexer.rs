//! Indexing pipeline: chunk → embed → commit, per file.

use std::collections::HashMap;
use std::sync::Arc;

use quarry_llm::LlmProvider;
use quarry_llm::retry::{BackoffPolicy, with_backoff};
use quarry_store::{FileLedger, IndexEntry, VectorIndex};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chunker::{Chunk, ChunkerConfig, chunk_source};
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::fingerprint;
use crate::languages::{Lang, detect_language};

/// A file as supplied by the surrounding system. The pipeline never
/// walks directories itself.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub file_path: String,
    pub content: String,
    /// Detected from the path when absent.
    pub language: Option<Lang>,
}

/// Indexer configuration.
#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    pub backoff: BackoffPolicy,
}

/// Outcome of indexing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Committed; carries the number of chunks now in the index.
    Indexed { chunks: usize, degraded: bool },
    /// Whole-file fingerprint unchanged since the last commit.
    Unchanged,
    /// Cancelled before commit; previously committed entries intact.
    Cancelled,
}

/// Summary of an indexing run over many documents.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_cancelled: usize,
    pub files_degraded: usize,
    pub chunks_created: usize,
    pub errors: Vec<String>,
}

/// Orchestrates chunking, embedding, and atomic per-file commits.
pub struct CodeIndexer<P: LlmProvider> {
    index: Arc<dyn VectorIndex>,
    embedder: Embedder<P>,
    ledger: Option<FileLedger>,
    file_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    config: IndexerConfig,
}

impl<P: LlmProvider> CodeIndexer<P> {
    #[must_use]
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Embedder<P>,
        ledger: Option<FileLedger>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            ledger,
            file_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Index or re-index one document.
    ///
    /// Writes for a given path are serialized; the replace commit is
    /// all-or-nothing, so cancellation or failure before commit leaves
    /// the previously committed entries for that file untouched.
    ///
    /// # Errors
    ///
    /// Embedding failures surface after bounded backoff; a post-commit
    /// entry-count mismatch is an [`IndexError::Consistency`].
    pub async fn index_file(
        &self,
        document: &SourceDocument,
        cancel: &CancellationToken,
    ) -> Result<FileStatus> {
        let lock = self.file_lock(&document.file_path).await;
        let _guard = lock.lock().await;

        let file_fingerprint = fingerprint::fingerprint(&document.content);
        if let Some(ledger) = &self.ledger {
            let last = ledger.lookup(&document.file_path).await?;
            if last.is_some_and(|row| row.fingerprint == file_fingerprint) {
                return Ok(FileStatus::Unchanged);
            }
        }

        let lang = document
            .language
            .or_else(|| detect_language(std::path::Path::new(&document.file_path)))
            .unwrap_or(Lang::Plain);
        let outcome = chunk_source(
            &document.file_path,
            &document.content,
            lang,
            &self.config.chunker,
        );
        if outcome.degraded {
            tracing::warn!(
                file = %document.file_path,
                "structural parse degraded, line windows in use"
            );
        }

        let vectors = with_backoff(&self.config.backoff, "embed chunks", || {
            self.embedder.embed_chunks(&outcome.chunks)
        })
        .await?;

        if cancel.is_cancelled() {
            tracing::debug!(file = %document.file_path, "indexing cancelled before commit");
            return Ok(FileStatus::Cancelled);
        }

        if let Some(first) = vectors.first() {
            let dimension = u64::try_from(first.len()).unwrap_or(u64::MAX);
            self.index.ensure_ready(dimension).await?;
        }

        let entries: Vec<IndexEntry> = outcome
            .chunks
            .iter()
            .zip(&vectors)
            .map(|(chunk, vector)| to_entry(chunk, vector.clone()))
            .collect();
        let committed = entries.len();
        self.index.replace_file(&document.file_path, entries).await?;

        let count = self.index.entry_count(&document.file_path).await?;
        if count != committed {
            return Err(IndexError::Consistency(format!(
                "{}: committed {committed} chunks but index holds {count}",
                document.file_path
            )));
        }

        if let Some(ledger) = &self.ledger {
            ledger
                .record(&document.file_path, &file_fingerprint, committed)
                .await?;
        }

        tracing::debug!(
            file = %document.file_path,
            chunks = committed,
            "file committed"
        );
        Ok(FileStatus::Indexed {
            chunks: committed,
            degraded: outcome.degraded,
        })
    }

    /// Remove a deleted file's entries and ledger row.
    ///
    /// # Errors
    ///
    /// Fails if the index delete fails.
    pub async fn remove_file(&self, file_path: &str) -> Result<usize> {
        let lock = self.file_lock(file_path).await;
        let _guard = lock.lock().await;

        let removed = self.index.delete_file(file_path).await?;
        if let Some(ledger) = &self.ledger {
            ledger.remove(file_path).await?;
        }
        tracing::debug!(file = %file_path, removed, "file removed from index");
        Ok(removed)
    }

    /// Index a batch of documents, accumulating a report. Individual file
    /// failures are recorded, not fatal to the run.
    pub async fn index_documents(
        &self,
        documents: &[SourceDocument],
        cancel: &CancellationToken,
    ) -> IndexReport {
        let mut report = IndexReport::default();
        let total = documents.len();
        tracing::info!(total, "indexing started");

        for document in documents {
            report.files_scanned += 1;
            if cancel.is_cancelled() {
                report.files_cancelled += total - report.files_scanned + 1;
                break;
            }
            match self.index_file(document, cancel).await {
                Ok(FileStatus::Indexed { chunks, degraded }) => {
                    report.files_indexed += 1;
                    report.chunks_created += chunks;
                    if degraded {
                        report.files_degraded += 1;
                    }
                }
                Ok(FileStatus::Unchanged) => report.files_unchanged += 1,
                Ok(FileStatus::Cancelled) => report.files_cancelled += 1,
                Err(e) => report.errors.push(format!("{}: {e}", document.file_path)),
            }
        }

        tracing::info!(
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            chunks = report.chunks_created,
            errors = report.errors.len(),
            "indexing finished"
        );
        report
    }

    #[must_use]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    async fn file_lock(&self, file_path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.file_locks.lock().await;
        Arc::clone(
            locks
                .entry(file_path.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

fn to_entry(chunk: &Chunk, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
        id: chunk.id.clone(),
        vector,
        meta: quarry_store::ChunkMeta {
            file_path: chunk.file_path.clone(),
            kind: chunk.kind,
            language: chunk.language.id().to_owned(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            symbol_path: chunk.symbol_path.clone(),
            fingerprint: chunk.fingerprint.clone(),
            context_header: chunk.context_header.clone(),
            text: chunk.text.clone(),
        },
    }
}
