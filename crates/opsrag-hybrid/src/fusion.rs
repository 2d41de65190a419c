//! Reciprocal rank fusion of the dense and sparse legs.

use std::collections::HashMap;

use opsrag_core::types::{Candidate, SearchHit, SourceKind};

/// `1/(k + dense_rank) + 1/(k + sparse_rank)`, ranks 1-based.
pub fn rrf_score(k: f32, dense_rank: usize, sparse_rank: usize) -> f32 {
    1.0 / (k + dense_rank as f32) + 1.0 / (k + sparse_rank as f32)
}

/// Merge both legs by chunk id. A chunk missing from a leg takes rank
/// `initial_n + 1` there. Output is sorted by fused score, ties by chunk id;
/// every chunk from either leg is present.
pub fn fuse(dense: &[SearchHit], sparse: &[SearchHit], initial_n: usize, k: f32) -> Vec<Candidate> {
    let mut by_id: HashMap<&str, Candidate> = HashMap::with_capacity(dense.len() + sparse.len());

    for (i, h) in dense.iter().enumerate() {
        by_id.entry(h.chunk.id.as_str()).or_insert_with(|| Candidate {
            chunk: h.chunk.clone(),
            origin: SourceKind::Dense,
            score: 0.0,
            dense_rank: Some(i + 1),
            sparse_rank: None,
        });
    }
    for (i, h) in sparse.iter().enumerate() {
        by_id
            .entry(h.chunk.id.as_str())
            .and_modify(|c| {
                if c.sparse_rank.is_none() {
                    c.sparse_rank = Some(i + 1);
                    c.origin = SourceKind::Hybrid;
                }
            })
            .or_insert_with(|| Candidate {
                chunk: h.chunk.clone(),
                origin: SourceKind::Sparse,
                score: 0.0,
                dense_rank: None,
                sparse_rank: Some(i + 1),
            });
    }

    let absent = initial_n + 1;
    let mut fused: Vec<Candidate> = by_id
        .into_values()
        .map(|mut c| {
            c.score = rrf_score(k, c.dense_rank.unwrap_or(absent), c.sparse_rank.unwrap_or(absent));
            c
        })
        .collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
    fused
}
