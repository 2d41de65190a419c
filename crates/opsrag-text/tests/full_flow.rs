use chrono::Utc;
use opsrag_core::chunker::{Chunker, ChunkingConfig};
use opsrag_core::traits::LexicalIndex;
use opsrag_core::types::{Document, SourceKind};
use opsrag_text::TantivyLexicalIndex;

fn corpus() -> Vec<opsrag_core::types::Chunk> {
    let doc = Document {
        id: "kb".into(),
        source: "k8s_docs".into(),
        resource_type: Some("troubleshooting".into()),
        text: "# Pods\nA pod stuck in CrashLoopBackOff keeps restarting its container.\n\n\
               Check pod logs with kubectl logs to find the crash reason.\n\n\
               # Nodes\nA node reports NotReady when the kubelet stops posting status.\n\n\
               # Services\nA service selects pods by label and load balances traffic."
            .into(),
        metadata: Default::default(),
    };
    Chunker::new(ChunkingConfig::default()).chunk_document_at(&doc, Utc::now())
}

#[test]
fn bm25_ranks_keyword_matches_first() {
    let idx = TantivyLexicalIndex::new().expect("index");
    let chunks = corpus();
    idx.rebuild(&chunks).expect("rebuild");
    assert_eq!(idx.len(), chunks.len());

    let hits = idx.search("node NotReady kubelet", 10).expect("search");
    assert!(!hits.is_empty());
    assert_eq!(hits[0].chunk.meta.heading, "Nodes");
    assert_eq!(hits[0].source, SourceKind::Sparse);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // heading text is searchable too
    let hits = idx.search("services", 3).expect("search");
    assert_eq!(hits[0].chunk.meta.heading, "Services");
}

#[test]
fn rebuild_replaces_previous_generation() {
    let idx = TantivyLexicalIndex::new().expect("index");
    idx.rebuild(&corpus()).expect("rebuild");
    assert!(!idx.search("CrashLoopBackOff", 5).expect("search").is_empty());

    idx.rebuild(&corpus()[3..]).expect("rebuild smaller");
    assert!(idx.search("CrashLoopBackOff", 5).expect("search").is_empty());
    assert_eq!(idx.len(), 1);

    let counts = idx.resource_type_counts().expect("counts");
    assert_eq!(counts, vec![("troubleshooting".to_string(), 1)]);
}
