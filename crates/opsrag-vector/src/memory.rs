use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use opsrag_core::traits::VectorStore;
use opsrag_core::types::{EmbeddedChunk, SearchHit, SourceKind};

/// Cosine similarity; zero vectors and length mismatches score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Brute-force store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryVectorStore {
    rows: RwLock<Vec<EmbeddedChunk>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        self.rows.write().await.extend_from_slice(chunks);
        Ok(())
    }

    async fn search(&self, query: &[f32], embedder_id: &str, k: usize) -> Result<Vec<SearchHit>> {
        let rows = self.rows.read().await;
        let mut hits: Vec<SearchHit> = rows
            .iter()
            .filter(|r| r.embedder_id == embedder_id)
            .map(|r| SearchHit { chunk: r.chunk.clone(), score: cosine_similarity(query, &r.embedding), source: SourceKind::Dense })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn load_all(&self) -> Result<Vec<EmbeddedChunk>> {
        Ok(self.rows.read().await.clone())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().await.len())
    }
}
