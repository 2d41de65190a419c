use std::fs;
use tempfile::TempDir;

use opsrag_core::chunker::{Chunker, ChunkingConfig};
use opsrag_core::records::{load_directory, load_json_records, parse_json_records};

#[test]
fn json_records_skip_malformed_entries() {
    let raw = r##"[
        {"content": "# Pods\nPods are the smallest unit.", "metadata": {"source": "k8s_docs", "resource_type": "pod"}, "id": "pods-1"},
        {"content": "no source here", "metadata": {}, "id": "bad-1"},
        {"metadata": {"source": "k8s_docs"}, "id": "bad-2"},
        {"document": "Alias payload works too.", "metadata": {"source": "runbook", "owner": "sre"}, "id": 7}
    ]"##;
    let report = parse_json_records(raw).expect("parse");
    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.skipped.len(), 2);

    let first = &report.documents[0];
    assert_eq!(first.id, "pods-1");
    assert_eq!(first.resource_type.as_deref(), Some("pod"));

    let second = &report.documents[1];
    assert_eq!(second.id, "7");
    assert_eq!(second.source, "runbook");
    assert_eq!(second.metadata.get("owner").map(String::as_str), Some("sre"));
}

#[test]
fn non_array_json_is_an_error() {
    assert!(parse_json_records("{\"content\": \"x\"}").is_err());
}

#[test]
fn load_json_file_from_disk() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.json");
    fs::write(&path, r#"[{"text": "Node bar is ready.", "metadata": {"source": "nodes"}, "id": "n1"}]"#).unwrap();
    let report = load_json_records(&path).expect("load");
    assert_eq!(report.documents.len(), 1);
    assert!(load_json_records(&tmp.path().join("missing.json")).is_err());
}

#[test]
fn directory_ingestion_tags_source_and_resource_type() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("troubleshooting")).unwrap();
    fs::write(dir.join("troubleshooting/crashloop.md"), "# CrashLoopBackOff\nCheck the logs.").unwrap();
    fs::write(dir.join("intro.txt"), "Short text").unwrap();
    fs::write(dir.join("ignored.json"), "{}").unwrap();

    let report = load_directory(dir).expect("load dir");
    assert_eq!(report.documents.len(), 2);
    let crash = report
        .documents
        .iter()
        .find(|d| d.source == "troubleshooting/crashloop.md")
        .expect("crashloop doc");
    assert_eq!(crash.resource_type.as_deref(), Some("troubleshooting"));
    assert_eq!(crash.id, "crashloop");

    let chunks = Chunker::new(ChunkingConfig::default()).chunk_document(crash);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].meta.heading, "CrashLoopBackOff");
}
