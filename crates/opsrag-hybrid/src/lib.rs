//! Deduplicating indexer and hybrid (dense + BM25) retriever.
//!
//! Dense and sparse candidates are merged with reciprocal rank fusion and
//! optionally reranked by a cross-encoder. See `engine::HybridSearchEngine`.

pub mod dedup;
pub mod engine;
pub mod fusion;

pub use engine::{HybridSearchEngine, IndexStats, IngestReport};
pub use fusion::{fuse, rrf_score};
