//! Persistence for the retrieval pipeline: vector index implementations,
//! the fingerprint-keyed embedding cache, and the per-file index ledger.

pub mod cache;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod qdrant;
pub mod vector_store;

pub use cache::EmbeddingCache;
pub use error::{Result, StoreError};
pub use ledger::{FileLedger, LedgerRow};
pub use memory::InMemoryIndex;
pub use qdrant::QdrantIndex;
pub use vector_store::{
    BoxFuture, ChunkKind, ChunkMeta, IndexEntry, SearchFilter, SearchHit, VectorIndex,
};
