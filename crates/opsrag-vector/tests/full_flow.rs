use chrono::{TimeZone, Utc};
use opsrag_core::traits::VectorStore;
use opsrag_core::types::{Chunk, ChunkMeta, EmbeddedChunk};
use opsrag_vector::{cosine_similarity, LanceVectorStore, MemoryVectorStore};

fn blake3_hash(s: &str) -> String { blake3::hash(s.as_bytes()).to_hex().to_string() }

fn row(id: &str, text: &str, embedding: Vec<f32>, embedder_id: &str) -> EmbeddedChunk {
    let mut extra = std::collections::HashMap::new();
    extra.insert("owner".to_string(), "sre".to_string());
    EmbeddedChunk {
        chunk: Chunk {
            id: id.into(),
            text: text.into(),
            meta: ChunkMeta {
                source: "k8s_docs".into(),
                doc_id: "kb".into(),
                heading: "Pods".into(),
                resource_type: "pod".into(),
                ordinal: 2,
                ingested_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
                extra,
            },
        },
        embedding,
        embedder_id: embedder_id.into(),
        content_hash: blake3_hash(text),
    }
}

fn fixtures() -> Vec<EmbeddedChunk> {
    vec![
        row("a", "pods restart", vec![1.0, 0.0, 0.0, 0.0], "m1"),
        row("b", "nodes ready", vec![0.0, 1.0, 0.0, 0.0], "m1"),
        row("c", "services route", vec![0.7, 0.7, 0.0, 0.0], "m1"),
        row("z", "other model", vec![1.0, 0.0, 0.0, 0.0], "m2"),
    ]
}

#[tokio::test]
async fn lance_store_roundtrip_and_filtered_search() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = LanceVectorStore::open(tmp.path(), "chunks", 4).await?;
    assert_eq!(store.count().await?, 0);
    assert!(store.search(&[1.0, 0.0, 0.0, 0.0], "m1", 3).await?.is_empty());

    store.add(&fixtures()).await?;
    assert_eq!(store.count().await?, 4);

    let hits = store.search(&[1.0, 0.0, 0.0, 0.0], "m1", 2).await?;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.id, "a");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert_eq!(hits[1].chunk.id, "c");
    assert!(hits.iter().all(|h| h.chunk.id != "z"), "other embedder rows are excluded");

    let all = store.load_all().await?;
    let a = all.iter().find(|r| r.chunk.id == "a").expect("row a");
    assert_eq!(a.chunk.meta.heading, "Pods");
    assert_eq!(a.chunk.meta.ordinal, 2);
    assert_eq!(a.chunk.meta.ingested_at.timestamp_millis(), 1_700_000_000_000);
    assert_eq!(a.chunk.meta.extra.get("owner").map(String::as_str), Some("sre"));
    assert_eq!(a.embedding, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(a.content_hash, blake3_hash("pods restart"));
    Ok(())
}

#[tokio::test]
async fn lance_store_rejects_dimension_change() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    {
        let store = LanceVectorStore::open(tmp.path(), "chunks", 4).await?;
        store.add(&fixtures()[..1]).await?;
        assert!(store.add(&[row("bad", "x", vec![1.0, 0.0], "m1")]).await.is_err());
    }
    assert!(LanceVectorStore::open(tmp.path(), "chunks", 8).await.is_err());
    opsrag_vector::table::reset_store(tmp.path())?;
    let fresh = LanceVectorStore::open(tmp.path(), "chunks", 8).await?;
    assert_eq!(fresh.count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn memory_store_matches_brute_force_cosine() -> anyhow::Result<()> {
    let store = MemoryVectorStore::new();
    store.add(&fixtures()).await?;
    let q = [0.6f32, 0.8, 0.0, 0.0];
    let hits = store.search(&q, "m1", 10).await?;
    assert_eq!(hits.len(), 3);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(hits[0].chunk.id, "c");
    assert!((hits[0].score - cosine_similarity(&q, &[0.7, 0.7, 0.0, 0.0])).abs() < 1e-6);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    Ok(())
}
