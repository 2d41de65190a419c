//! Deterministic stand-ins for offline development and tests.

use anyhow::Result;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use opsrag_core::traits::{CrossEncoder, Embedder};

/// Hashes whitespace tokens into buckets and L2-normalises. Identical texts
/// get identical vectors; texts sharing words land close together.
pub struct FakeEmbedder {
    dim: usize,
    model_id: String,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1), model_id: format!("fake-xxhash:d{}", dim.max(1)) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let token = token.to_lowercase();
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Cross-encoder stand-in: fraction of distinct query words found in the passage.
#[derive(Default)]
pub struct LexicalOverlapScorer;

impl CrossEncoder for LexicalOverlapScorer {
    fn model_id(&self) -> &str { "lexical-overlap" }

    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let query_words: HashSet<String> = words(query).into_iter().collect();
        if query_words.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }
        Ok(passages
            .iter()
            .map(|p| {
                let passage: HashSet<String> = words(p).into_iter().collect();
                query_words.iter().filter(|w| passage.contains(*w)).count() as f32 / query_words.len() as f32
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_scores_follow_shared_words() {
        let s = LexicalOverlapScorer;
        let scores = s.score("pod restarts", &["the pod restarts often", "node is ready", "Pod"]).unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert_eq!(scores[1], 0.0);
        assert!((scores[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fake_embedder_is_case_insensitive() {
        let e = FakeEmbedder::new(64);
        assert_eq!(e.embed_one("Pod Foo").unwrap(), e.embed_one("pod foo").unwrap());
    }
}
