use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use opsrag_core::chunker::{Chunker, ChunkingConfig};
use opsrag_core::config::RetrievalSettings;
use opsrag_core::error::Error;
use opsrag_core::traits::{ContextRetriever, CrossEncoder, Embedder, LexicalIndex, VectorStore};
use opsrag_core::types::{
    Candidate, Chunk, ChunkId, Document, EmbeddedChunk, RetrievedChunk, SearchHit,
};

use crate::dedup::{content_hash, is_near_duplicate};
use crate::fusion::fuse;

/// Accepted chunks produced by the active embedder.
#[derive(Default)]
struct Corpus {
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
    /// Chunk id to content hash.
    ids: HashMap<ChunkId, String>,
    hashes: HashSet<String>,
}

impl Corpus {
    fn accept(&mut self, ec: EmbeddedChunk) {
        self.ids.insert(ec.chunk.id.clone(), ec.content_hash.clone());
        self.hashes.insert(ec.content_hash);
        self.chunks.push(ec.chunk);
        self.embeddings.push(ec.embedding);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks_seen: usize,
    pub accepted: usize,
    pub duplicate_ids: usize,
    pub exact_duplicates: usize,
    pub near_duplicates: usize,
    pub embedding_failures: usize,
    pub store_failures: usize,
}

impl IngestReport {
    pub fn rejected(&self) -> usize {
        self.duplicate_ids + self.exact_duplicates + self.near_duplicates
    }
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub active_embedder: String,
    pub corpus_chunks: usize,
    pub lexical_chunks: usize,
    pub stored_rows: usize,
    pub rows_by_embedder: BTreeMap<String, usize>,
}

/// The retrieval service: owns the embedder, the vector store, the lexical
/// index and the optional cross-encoder. Ingestion and `rebuild` take the
/// corpus write lock; retrieval holds the read lock for its duration.
pub struct HybridSearchEngine<L, V>
where
    L: LexicalIndex,
    V: VectorStore,
{
    embedder: Arc<dyn Embedder>,
    store: V,
    lexical: L,
    reranker: Option<Arc<dyn CrossEncoder>>,
    chunker: Chunker,
    settings: RetrievalSettings,
    corpus: RwLock<Corpus>,
}

impl<L, V> HybridSearchEngine<L, V>
where
    L: LexicalIndex,
    V: VectorStore,
{
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: V,
        lexical: L,
        settings: RetrievalSettings,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            lexical,
            reranker: None,
            chunker: Chunker::new(chunking),
            settings,
            corpus: RwLock::new(Corpus::default()),
        }
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn CrossEncoder>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.model_id()
    }

    /// Load the persisted corpus for the active embedder and rebuild the
    /// lexical index over it. Rows from other embedders stay in the store but
    /// are left out until they are re-ingested.
    #[instrument(skip(self))]
    pub async fn load_persisted(&self) -> Result<usize> {
        let rows = self.store.load_all().await?;
        let active = self.embedder.model_id().to_string();
        let mut corpus = self.corpus.write().await;
        *corpus = Corpus::default();
        let mut foreign = 0usize;
        for row in rows {
            if row.embedder_id != active {
                foreign += 1;
                continue;
            }
            if corpus.ids.contains_key(&row.chunk.id) {
                continue;
            }
            corpus.accept(row);
        }
        if foreign > 0 {
            warn!(
                foreign,
                active = %active,
                "stored chunks from another embedder are excluded; re-ingest to include them"
            );
        }
        self.lexical.rebuild(&corpus.chunks)?;
        info!(chunks = corpus.chunks.len(), "loaded persisted corpus");
        Ok(corpus.chunks.len())
    }

    /// Rebuild the lexical index from the accepted corpus.
    pub async fn rebuild(&self) -> Result<()> {
        let corpus = self.corpus.write().await;
        self.lexical.rebuild(&corpus.chunks)
    }

    /// Chunk, embed, deduplicate and persist `docs`, then rebuild the lexical
    /// index. Failures skip the affected chunk or document only.
    #[instrument(skip(self, docs), fields(docs = docs.len()))]
    pub async fn ingest(&self, docs: &[Document]) -> Result<IngestReport> {
        self.ingest_with_progress(docs, |_| {}).await
    }

    /// Like `ingest`, calling `on_document` with the running report after
    /// each document.
    pub async fn ingest_with_progress<F>(
        &self,
        docs: &[Document],
        mut on_document: F,
    ) -> Result<IngestReport>
    where
        F: FnMut(&IngestReport) + Send,
    {
        let mut corpus = self.corpus.write().await;
        let mut report = IngestReport::default();
        let threshold = self.settings.dedup_threshold;
        let embedder_id = self.embedder.model_id().to_string();

        for doc in docs {
            report.documents += 1;
            let chunks = self.chunker.chunk_document(doc);
            report.chunks_seen += chunks.len();
            let embeddings = self.embed_chunks(&chunks);

            let mut pending: Vec<EmbeddedChunk> = Vec::new();
            for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
                let Some(embedding) = embedding else {
                    report.embedding_failures += 1;
                    continue;
                };
                let hash = content_hash(&chunk.text);
                let known = corpus.ids.get(&chunk.id).or_else(|| {
                    pending.iter().find(|p| p.chunk.id == chunk.id).map(|p| &p.content_hash)
                });
                if let Some(known) = known {
                    if *known == hash {
                        debug!(chunk = %chunk.id, "duplicate chunk id rejected");
                    } else {
                        warn!(
                            chunk = %chunk.id,
                            "chunk id stored with different text; rejected (re-ingest with --fresh)"
                        );
                    }
                    report.duplicate_ids += 1;
                    continue;
                }
                if corpus.hashes.contains(&hash) || pending.iter().any(|p| p.content_hash == hash) {
                    debug!(chunk = %chunk.id, "exact duplicate rejected");
                    report.exact_duplicates += 1;
                    continue;
                }
                let accepted = corpus
                    .embeddings
                    .iter()
                    .map(Vec::as_slice)
                    .chain(pending.iter().map(|p| p.embedding.as_slice()));
                if is_near_duplicate(&embedding, accepted, threshold) {
                    debug!(chunk = %chunk.id, threshold, "near duplicate rejected");
                    report.near_duplicates += 1;
                    continue;
                }
                pending.push(EmbeddedChunk {
                    chunk,
                    embedding,
                    embedder_id: embedder_id.clone(),
                    content_hash: hash,
                });
            }

            if !pending.is_empty() {
                match self.store.add(&pending).await {
                    Ok(()) => {
                        report.accepted += pending.len();
                        for ec in pending {
                            corpus.accept(ec);
                        }
                    }
                    Err(e) => {
                        let err = Error::Ingestion {
                            record: doc.id.clone(),
                            reason: e.to_string(),
                        };
                        warn!(
                            error = %err,
                            chunks = pending.len(),
                            "vector store write failed; document skipped"
                        );
                        report.store_failures += 1;
                    }
                }
            }
            on_document(&report);
        }

        if report.accepted > 0 || self.lexical.len() != corpus.chunks.len() {
            self.lexical.rebuild(&corpus.chunks)?;
        }
        info!(
            accepted = report.accepted,
            rejected = report.rejected(),
            embedding_failures = report.embedding_failures,
            total = corpus.chunks.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// One vector per chunk, `None` where embedding failed. A failed batch
    /// is retried chunk by chunk so only the failing chunks are lost.
    fn embed_chunks(&self, chunks: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        if chunks.is_empty() {
            return Vec::new();
        }
        let dim = self.embedder.dim();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match self.embedder.embed_batch(&texts) {
            Ok(vectors) if vectors.len() == chunks.len() => {
                return vectors
                    .into_iter()
                    .zip(chunks)
                    .map(|(v, c)| self.check_dim(v, dim, c))
                    .collect();
            }
            Ok(vectors) => warn!(
                expected = chunks.len(),
                got = vectors.len(),
                "embedder returned wrong batch size; retrying per chunk"
            ),
            Err(e) => warn!(error = %e, "batch embedding failed; retrying per chunk"),
        }
        chunks
            .iter()
            .map(|c| match self.embedder.embed_one(&c.text) {
                Ok(v) => self.check_dim(v, dim, c),
                Err(e) => {
                    let err = Error::Embedding { chunk: c.id.clone(), reason: e.to_string() };
                    warn!(error = %err, "skipping chunk");
                    None
                }
            })
            .collect()
    }

    fn check_dim(&self, v: Vec<f32>, dim: usize, chunk: &Chunk) -> Option<Vec<f32>> {
        if v.len() == dim {
            Some(v)
        } else {
            let err = Error::Embedding {
                chunk: chunk.id.clone(),
                reason: format!("expected {dim} dims, got {}", v.len()),
            };
            warn!(error = %err, "skipping chunk");
            None
        }
    }

    async fn dense_leg(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let q_vec = self.embedder.embed_one(query)?;
        self.store.search(&q_vec, self.embedder.model_id(), k).await
    }

    /// Hybrid retrieval. Never fails: an unavailable leg contributes nothing
    /// and both failing yields an empty list. At most `n` results, ordered by
    /// non-increasing score.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, n: usize, rerank: bool) -> Vec<RetrievedChunk> {
        if n == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        let _corpus = self.corpus.read().await;
        let initial_n = self.settings.initial_n.max(n);

        let dense = self.dense_leg(query, initial_n).await.unwrap_or_else(|e| {
            let err = Error::Retrieval { leg: "dense", reason: e.to_string() };
            warn!(error = %err, "retrieval leg failed");
            Vec::new()
        });
        let sparse = self.lexical.search(query, initial_n).unwrap_or_else(|e| {
            let err = Error::Retrieval { leg: "sparse", reason: e.to_string() };
            warn!(error = %err, "retrieval leg failed");
            Vec::new()
        });
        debug!(dense = dense.len(), sparse = sparse.len(), "legs retrieved");

        let mut fused = fuse(&dense, &sparse, initial_n, self.settings.fusion_k);
        let ordered = match (&self.reranker, rerank) {
            (Some(reranker), true) => self.rerank(&**reranker, query, fused, n),
            _ => {
                fused.truncate(n);
                fused
            }
        };
        ordered.into_iter().map(RetrievedChunk::from).collect()
    }

    /// Cross-encoder rerank of the top `rerank_top_n` fused candidates. The
    /// remaining fused candidates fill up to `n`, with scores capped so the
    /// output stays non-increasing. A reranker failure keeps fused order.
    fn rerank(
        &self,
        reranker: &dyn CrossEncoder,
        query: &str,
        mut fused: Vec<Candidate>,
        n: usize,
    ) -> Vec<Candidate> {
        let pool_size = self.settings.rerank_top_n.max(1).min(fused.len());
        let rest = fused.split_off(pool_size);
        let pool = fused;
        let passages: Vec<&str> = pool.iter().map(|c| c.chunk.text.as_str()).collect();

        let scores = match reranker.score(query, &passages) {
            Ok(scores) if scores.len() == pool.len() => scores,
            Ok(scores) => {
                warn!(
                    expected = pool.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores; keeping fused order"
                );
                return pool.into_iter().chain(rest).take(n).collect();
            }
            Err(e) => {
                warn!(error = %e, "reranker failed; keeping fused order");
                return pool.into_iter().chain(rest).take(n).collect();
            }
        };

        let mut reranked: Vec<Candidate> = pool
            .into_iter()
            .zip(scores)
            .map(|(mut c, s)| {
                c.score = s;
                c
            })
            .collect();
        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        reranked.truncate(n);

        let mut floor = reranked.last().map_or(f32::INFINITY, |c| c.score);
        for mut c in rest {
            if reranked.len() >= n {
                break;
            }
            c.score = c.score.min(floor);
            floor = c.score;
            reranked.push(c);
        }
        reranked
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let corpus = self.corpus.read().await;
        let rows = self.store.load_all().await?;
        let mut rows_by_embedder = BTreeMap::new();
        for r in &rows {
            *rows_by_embedder.entry(r.embedder_id.clone()).or_insert(0usize) += 1;
        }
        Ok(IndexStats {
            active_embedder: self.embedder.model_id().to_string(),
            corpus_chunks: corpus.chunks.len(),
            lexical_chunks: self.lexical.len(),
            stored_rows: rows.len(),
            rows_by_embedder,
        })
    }
}

#[async_trait]
impl<L, V> ContextRetriever for HybridSearchEngine<L, V>
where
    L: LexicalIndex,
    V: VectorStore,
{
    async fn retrieve(&self, query: &str, n: usize, rerank: bool) -> Result<Vec<RetrievedChunk>> {
        Ok(self.search(query, n, rerank).await)
    }
}
