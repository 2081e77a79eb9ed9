//! Index statistics rollup.

use std::collections::BTreeMap;

use quarry_store::{ChunkMeta, VectorIndex};

use crate::error::Result;

/// Snapshot of what the index currently holds.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_language: BTreeMap<String, usize>,
}

impl IndexStats {
    #[must_use]
    pub fn from_metadata(metas: &[ChunkMeta]) -> Self {
        let mut stats = Self {
            chunks: metas.len(),
            ..Self::default()
        };
        let mut files = std::collections::BTreeSet::new();
        for meta in metas {
            files.insert(meta.file_path.as_str());
            *stats.by_kind.entry(meta.kind.to_string()).or_insert(0) += 1;
            *stats
                .by_language
                .entry(meta.language.clone())
                .or_insert(0) += 1;
        }
        stats.files = files.len();
        stats
    }
}

/// Compute statistics over everything currently retrievable.
///
/// # Errors
///
/// Fails if the index metadata enumeration fails.
pub async fn index_stats(index: &dyn VectorIndex) -> Result<IndexStats> {
    let metas = index.metadata().await?;
    Ok(IndexStats::from_metadata(&metas))
}
