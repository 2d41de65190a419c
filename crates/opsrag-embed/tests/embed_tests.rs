use opsrag_core::config::{EmbeddingSettings, RerankerSettings};
use opsrag_core::traits::{CrossEncoder, Embedder};
use opsrag_embed::{get_default_embedder, get_default_reranker};

#[test]
fn fake_embedder_shapes_and_determinism() {
    let settings = EmbeddingSettings { use_fake: true, dim: 384, ..Default::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    let texts = vec!["hello world".to_string(), "hello world".to_string(), "node bar is ready".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 384, "embedding dim follows settings");
    assert_eq!(embedder.dim(), 384);
    assert!(embedder.model_id().contains("d384"));

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
    assert_ne!(embs[0], embs[2]);
}

#[test]
fn disabled_reranker_is_none_and_fake_is_overlap() {
    let off = RerankerSettings { enabled: false, ..Default::default() };
    assert!(get_default_reranker(&off).expect("reranker").is_none());

    let fake = RerankerSettings { enabled: true, use_fake: true, model_dir: None };
    let r = get_default_reranker(&fake).expect("reranker").expect("some");
    assert_eq!(r.model_id(), "lexical-overlap");
}
