//! In-memory vector index.
//!
//! Reference implementation of the [`VectorIndex`] contract, and the
//! backing store for tests. A single `RwLock` over the entry map makes
//! per-file replacement atomic for readers.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::vector_store::{
    BoxFuture, ChunkMeta, IndexEntry, SearchFilter, SearchHit, VectorIndex, rank_hits,
};

struct StoredEntry {
    vector: Vec<f32>,
    meta: ChunkMeta,
}

pub struct InMemoryIndex {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIndex").finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex for InMemoryIndex {
    fn ensure_ready(&self, _vector_size: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn upsert(&self, entry: IndexEntry) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut entries = self
                .entries
                .write()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            entries.retain(|id, stored| {
                id == &entry.id
                    || stored.meta.file_path != entry.meta.file_path
                    || !stored.meta.overlaps(entry.meta.start_line, entry.meta.end_line)
            });
            entries.insert(
                entry.id,
                StoredEntry {
                    vector: entry.vector,
                    meta: entry.meta,
                },
            );
            Ok(())
        })
    }

    fn replace_file(&self, file_path: &str, new: Vec<IndexEntry>) -> BoxFuture<'_, Result<()>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let mut entries = self
                .entries
                .write()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            entries.retain(|_, stored| stored.meta.file_path != file_path);
            for entry in new {
                entries.insert(
                    entry.id,
                    StoredEntry {
                        vector: entry.vector,
                        meta: entry.meta,
                    },
                );
            }
            Ok(())
        })
    }

    fn delete_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let mut entries = self
                .entries
                .write()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let before = entries.len();
            entries.retain(|_, stored| stored.meta.file_path != file_path);
            Ok(before - entries.len())
        })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            let entries = self
                .entries
                .read()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let filter = filter.unwrap_or_default();

            let mut hits: Vec<SearchHit> = entries
                .iter()
                .filter(|(_, stored)| filter.matches(&stored.meta))
                .map(|(id, stored)| SearchHit {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &stored.vector),
                    meta: stored.meta.clone(),
                })
                .collect();

            rank_hits(&mut hits);
            hits.truncate(limit);
            Ok(hits)
        })
    }

    fn entry_count(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let entries = self
                .entries
                .read()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            Ok(entries
                .values()
                .filter(|stored| stored.meta.file_path == file_path)
                .count())
        })
    }

    fn indexed_files(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let entries = self
                .entries
                .read()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let mut files: Vec<String> = entries
                .values()
                .map(|stored| stored.meta.file_path.clone())
                .collect();
            files.sort();
            files.dedup();
            Ok(files)
        })
    }

    fn metadata(&self) -> BoxFuture<'_, Result<Vec<ChunkMeta>>> {
        Box::pin(async move {
            let entries = self
                .entries
                .read()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let mut metas: Vec<ChunkMeta> =
                entries.values().map(|stored| stored.meta.clone()).collect();
            metas.sort_by(|a, b| {
                a.file_path
                    .cmp(&b.file_path)
                    .then_with(|| a.start_line.cmp(&b.start_line))
            });
            Ok(metas)
        })
    }
}
