//! Vector index contract and its data model.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Closed set of retrievable unit shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    ModuleFragment,
    FallbackWindow,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::ModuleFragment => "module-fragment",
            Self::FallbackWindow => "fallback-window",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "module-fragment" => Some(Self::ModuleFragment),
            "fallback-window" => Some(Self::FallbackWindow),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata carried by every index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub file_path: String,
    pub kind: ChunkKind,
    pub language: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    /// `::`-joined enclosing symbols, empty at module level.
    pub symbol_path: String,
    pub fingerprint: String,
    /// Synthesized enclosing signature for nested units.
    pub context_header: Option<String>,
    /// Exact source slice for the line range.
    pub text: String,
}

impl ChunkMeta {
    /// Number of source lines the entry spans.
    #[must_use]
    pub fn span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line)
    }

    /// Whether the line range intersects `[start, end]`.
    #[must_use]
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start_line <= end && self.end_line >= start
    }
}

/// One persisted (id, vector, metadata) triple.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub meta: ChunkMeta,
}

/// One search result, highest similarity first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub meta: ChunkMeta,
}

/// Metadata restrictions applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub kind: Option<ChunkKind>,
}

impl SearchFilter {
    #[must_use]
    pub fn matches(&self, meta: &ChunkMeta) -> bool {
        if let Some(path) = &self.file_path
            && path != &meta.file_path
        {
            return false;
        }
        if let Some(language) = &self.language
            && language != &meta.language
        {
            return false;
        }
        if let Some(kind) = self.kind
            && kind != meta.kind
        {
            return false;
        }
        true
    }
}

/// Order hits by descending score with deterministic tie-breaks:
/// shorter line span first, then id.
pub(crate) fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.meta.span().cmp(&b.meta.span()))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Nearest-neighbor index over embedded chunks.
///
/// The index is the single source of truth for what is retrievable: after
/// any write completes, `search` reflects exactly the committed entries.
/// Writes to one file never expose readers to a half-updated state of that
/// file.
pub trait VectorIndex: Send + Sync {
    /// Prepare backing storage for vectors of `vector_size` dimensions.
    /// Idempotent.
    fn ensure_ready(&self, vector_size: u64) -> BoxFuture<'_, Result<()>>;

    /// Insert or replace an entry by id. An existing entry of the same file
    /// with an overlapping line range but a different id is removed in the
    /// same logical operation.
    fn upsert(&self, entry: IndexEntry) -> BoxFuture<'_, Result<()>>;

    /// Replace every entry of `file_path` with `entries` atomically from
    /// the reader's perspective.
    fn replace_file(&self, file_path: &str, entries: Vec<IndexEntry>) -> BoxFuture<'_, Result<()>>;

    /// Remove every entry of `file_path`, returning how many were removed.
    fn delete_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>>;

    /// Up to `limit` entries by descending cosine similarity. Ties break by
    /// shorter line span, then id.
    fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>>>;

    /// Number of entries currently committed for `file_path`.
    fn entry_count(&self, file_path: &str) -> BoxFuture<'_, Result<usize>>;

    /// Distinct file paths with at least one committed entry.
    fn indexed_files(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Metadata of every committed entry (statistics, audits).
    fn metadata(&self) -> BoxFuture<'_, Result<Vec<ChunkMeta>>>;
}
