//! Structure-aware code indexing and budget-packed semantic retrieval.
//!
//! The pipeline: tree-sitter parses source into declaration-level chunks,
//! chunks are fingerprinted and embedded (cache-first), and a vector index
//! serves similarity search. The retriever turns a question into a
//! merged, diversity-capped, token-budgeted context and asks the
//! generation backend for an answer with exact citations.

pub mod chunker;
pub mod context;
pub mod embedder;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod languages;
pub mod prompt;
pub mod retriever;
pub mod source;
pub mod stats;

pub use chunker::{Chunk, ChunkOutcome, ChunkerConfig, chunk_source};
pub use embedder::{Embedder, EmbedderConfig};
pub use error::{IndexError, Result};
pub use indexer::{CodeIndexer, FileStatus, IndexReport, IndexerConfig, SourceDocument};
pub use languages::{Lang, detect_language};
pub use retriever::{Answer, BudgetUnit, Citation, CodeRetriever, RetrievalConfig, RetrievedContext};
pub use source::{FsSourceReader, SourceReader, StaticSourceReader};
pub use stats::{IndexStats, index_stats};
