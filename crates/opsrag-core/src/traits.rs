use async_trait::async_trait;

use crate::types::{EmbeddedChunk, Chunk, RetrievedChunk, SearchHit};

pub trait Embedder: Send + Sync {
    /// Stable identifier of the model (e.g. `bert:all-MiniLM-L6-v2:d384`).
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
    }
}

/// Joint (query, passage) relevance model used to rerank fused candidates.
pub trait CrossEncoder: Send + Sync {
    fn model_id(&self) -> &str;
    /// One score per passage, same order as `passages`. Higher is more relevant.
    fn score(&self, query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>>;
}

/// Keyword index rebuilt in memory from the accepted corpus.
pub trait LexicalIndex: Send + Sync {
    /// Replace the whole index with one built over `chunks`. Readers keep
    /// seeing the previous index until the new one is complete.
    fn rebuild(&self, chunks: &[Chunk]) -> anyhow::Result<()>;
    fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, chunks: &[EmbeddedChunk]) -> anyhow::Result<()>;
    /// Nearest neighbours among chunks embedded by `embedder_id`.
    async fn search(&self, query: &[f32], embedder_id: &str, k: usize) -> anyhow::Result<Vec<SearchHit>>;
    async fn load_all(&self) -> anyhow::Result<Vec<EmbeddedChunk>>;
    async fn count(&self) -> anyhow::Result<usize>;
}

/// What the orchestrator needs from the retrieval side.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, n: usize, rerank: bool) -> anyhow::Result<Vec<RetrievedChunk>>;
}
