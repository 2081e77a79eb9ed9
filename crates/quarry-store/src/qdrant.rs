//! Qdrant-backed vector index with `SQLite` metadata rows.
//!
//! Qdrant holds the vectors and payloads; `SQLite` holds one metadata row
//! per point so file-scoped deletes, counts, and audits never need a
//! collection scan.

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointStruct, PointsIdsList, ScalarQuantizationBuilder,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use sqlx::SqlitePool;

use crate::error::{Result, StoreError};
use crate::vector_store::{
    BoxFuture, ChunkKind, ChunkMeta, IndexEntry, SearchFilter, SearchHit, VectorIndex, rank_hits,
};

pub struct QdrantIndex {
    qdrant: Qdrant,
    collection: String,
    pool: SqlitePool,
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl QdrantIndex {
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(qdrant_url: &str, collection: &str, pool: SqlitePool) -> Result<Self> {
        let qdrant = Qdrant::from_url(qdrant_url)
            .build()
            .map_err(|e| StoreError::Qdrant(Box::new(e)))?;
        Ok(Self {
            qdrant,
            collection: collection.to_owned(),
            pool,
        })
    }

    /// Create the metadata table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL statements fail.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunk_meta (\
                 id TEXT PRIMARY KEY,\
                 file_path TEXT NOT NULL,\
                 kind TEXT NOT NULL,\
                 language TEXT NOT NULL,\
                 start_line INTEGER NOT NULL,\
                 end_line INTEGER NOT NULL,\
                 symbol_path TEXT NOT NULL,\
                 fingerprint TEXT NOT NULL,\
                 context_header TEXT,\
                 body TEXT NOT NULL\
             )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_meta_file ON chunk_meta (file_path)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ids_for_file(&self, file_path: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM chunk_meta WHERE file_path = ?")
            .bind(file_path)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_points(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids = ids.into_iter().map(Into::into).collect::<Vec<_>>();
        self.qdrant
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids: point_ids }),
            )
            .await
            .map_err(|e| StoreError::Qdrant(Box::new(e)))?;
        Ok(())
    }

    async fn insert_row(&self, entry: &IndexEntry) -> Result<()> {
        let meta = &entry.meta;
        sqlx::query(
            "INSERT OR REPLACE INTO chunk_meta \
             (id, file_path, kind, language, start_line, end_line, symbol_path, fingerprint, context_header, body) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&meta.file_path)
        .bind(meta.kind.as_str())
        .bind(&meta.language)
        .bind(i64::try_from(meta.start_line)?)
        .bind(i64::try_from(meta.end_line)?)
        .bind(&meta.symbol_path)
        .bind(&meta.fingerprint)
        .bind(meta.context_header.as_deref())
        .bind(&meta.text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_points(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut points = Vec::with_capacity(entries.len());
        for entry in entries {
            points.push(to_point(entry)?);
        }
        self.qdrant
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await
            .map_err(|e| StoreError::Qdrant(Box::new(e)))?;
        Ok(())
    }
}

fn to_point(entry: &IndexEntry) -> Result<PointStruct> {
    let meta = &entry.meta;
    let payload: std::collections::HashMap<String, qdrant_client::qdrant::Value> =
        serde_json::from_value(serde_json::json!({
            "file_path": meta.file_path,
            "kind": meta.kind.as_str(),
            "language": meta.language,
            "start_line": meta.start_line,
            "end_line": meta.end_line,
            "symbol_path": meta.symbol_path,
            "fingerprint": meta.fingerprint,
            "context_header": meta.context_header,
            "body": meta.text,
        }))?;
    Ok(PointStruct::new(
        entry.id.clone(),
        entry.vector.clone(),
        payload,
    ))
}

fn to_filter(filter: &SearchFilter) -> Option<Filter> {
    let mut conditions = Vec::new();
    if let Some(path) = &filter.file_path {
        conditions.push(Condition::matches("file_path", path.clone()));
    }
    if let Some(language) = &filter.language {
        conditions.push(Condition::matches("language", language.clone()));
    }
    if let Some(kind) = filter.kind {
        conditions.push(Condition::matches("kind", kind.as_str().to_owned()));
    }
    if conditions.is_empty() {
        None
    } else {
        Some(Filter::must(conditions))
    }
}

fn hit_from_scored_point(point: &ScoredPoint) -> Option<SearchHit> {
    let p = &point.payload;
    let get_str = |key: &str| {
        p.get(key)
            .and_then(qdrant_client::qdrant::Value::as_str)
            .cloned()
    };
    let get_int = |key: &str| {
        p.get(key)
            .and_then(qdrant_client::qdrant::Value::as_integer)
            .and_then(|v| usize::try_from(v).ok())
    };
    let id = match point.id.as_ref()?.point_id_options.as_ref()? {
        qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid) => uuid.clone(),
        qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
    };

    Some(SearchHit {
        id,
        score: point.score,
        meta: ChunkMeta {
            file_path: get_str("file_path")?,
            kind: ChunkKind::parse(&get_str("kind")?)?,
            language: get_str("language")?,
            start_line: get_int("start_line")?,
            end_line: get_int("end_line")?,
            symbol_path: get_str("symbol_path").unwrap_or_default(),
            fingerprint: get_str("fingerprint")?,
            context_header: get_str("context_header"),
            text: get_str("body")?,
        },
    })
}

type MetaRow = (
    String,
    String,
    String,
    i64,
    i64,
    String,
    String,
    Option<String>,
    String,
);

fn meta_from_row(row: MetaRow) -> Result<ChunkMeta> {
    let (file_path, kind, language, start_line, end_line, symbol_path, fingerprint, header, body) =
        row;
    Ok(ChunkMeta {
        kind: ChunkKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown chunk kind: {kind}")))?,
        file_path,
        language,
        start_line: usize::try_from(start_line)?,
        end_line: usize::try_from(end_line)?,
        symbol_path,
        fingerprint,
        context_header: header,
        text: body,
    })
}

impl VectorIndex for QdrantIndex {
    fn ensure_ready(&self, vector_size: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.migrate().await?;

            let exists = self
                .qdrant
                .collection_exists(&self.collection)
                .await
                .map_err(|e| StoreError::Qdrant(Box::new(e)))?;
            if exists {
                return Ok(());
            }

            self.qdrant
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine))
                        .quantization_config(ScalarQuantizationBuilder::default()),
                )
                .await
                .map_err(|e| StoreError::Qdrant(Box::new(e)))?;

            for field in ["file_path", "language", "kind"] {
                self.qdrant
                    .create_field_index(CreateFieldIndexCollectionBuilder::new(
                        &self.collection,
                        field,
                        FieldType::Keyword,
                    ))
                    .await
                    .map_err(|e| StoreError::Qdrant(Box::new(e)))?;
            }

            Ok(())
        })
    }

    fn upsert(&self, entry: IndexEntry) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let superseded: Vec<(String,)> = sqlx::query_as(
                "SELECT id FROM chunk_meta \
                 WHERE file_path = ? AND start_line <= ? AND end_line >= ? AND id != ?",
            )
            .bind(&entry.meta.file_path)
            .bind(i64::try_from(entry.meta.end_line)?)
            .bind(i64::try_from(entry.meta.start_line)?)
            .bind(&entry.id)
            .fetch_all(&self.pool)
            .await?;

            if !superseded.is_empty() {
                let ids: Vec<String> = superseded.into_iter().map(|(id,)| id).collect();
                self.delete_points(ids.clone()).await?;
                for id in &ids {
                    sqlx::query("DELETE FROM chunk_meta WHERE id = ?")
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
            }

            self.upsert_points(std::slice::from_ref(&entry)).await?;
            self.insert_row(&entry).await
        })
    }

    fn replace_file(&self, file_path: &str, entries: Vec<IndexEntry>) -> BoxFuture<'_, Result<()>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let old_ids = self.ids_for_file(&file_path).await?;
            self.delete_points(old_ids).await?;
            sqlx::query("DELETE FROM chunk_meta WHERE file_path = ?")
                .bind(&file_path)
                .execute(&self.pool)
                .await?;

            self.upsert_points(&entries).await?;
            for entry in &entries {
                self.insert_row(entry).await?;
            }
            tracing::debug!(file = %file_path, entries = entries.len(), "file entries replaced");
            Ok(())
        })
    }

    fn delete_file(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let ids = self.ids_for_file(&file_path).await?;
            let count = ids.len();
            self.delete_points(ids).await?;
            sqlx::query("DELETE FROM chunk_meta WHERE file_path = ?")
                .bind(&file_path)
                .execute(&self.pool)
                .await?;
            tracing::debug!(file = %file_path, removed = count, "file entries deleted");
            Ok(count)
        })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            let mut builder =
                SearchPointsBuilder::new(&self.collection, vector, limit as u64).with_payload(true);
            if let Some(f) = filter.as_ref().and_then(to_filter) {
                builder = builder.filter(f);
            }

            let response = self
                .qdrant
                .search_points(builder)
                .await
                .map_err(|e| StoreError::Qdrant(Box::new(e)))?;

            let mut hits: Vec<SearchHit> = response
                .result
                .iter()
                .filter_map(hit_from_scored_point)
                .collect();
            rank_hits(&mut hits);
            hits.truncate(limit);
            Ok(hits)
        })
    }

    fn entry_count(&self, file_path: &str) -> BoxFuture<'_, Result<usize>> {
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let row: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM chunk_meta WHERE file_path = ?")
                    .bind(&file_path)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(usize::try_from(row.0)?)
        })
    }

    fn indexed_files(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT DISTINCT file_path FROM chunk_meta ORDER BY file_path")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(|(p,)| p).collect())
        })
    }

    fn metadata(&self) -> BoxFuture<'_, Result<Vec<ChunkMeta>>> {
        Box::pin(async move {
            let rows: Vec<MetaRow> = sqlx::query_as(
                "SELECT file_path, kind, language, start_line, end_line, symbol_path, \
                 fingerprint, context_header, body \
                 FROM chunk_meta ORDER BY file_path, start_line",
            )
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(meta_from_row).collect()
        })
    }
}
