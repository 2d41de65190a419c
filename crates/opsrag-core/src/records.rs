//! Ingestion input: JSON record arrays and directories of text files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Error;
use crate::types::{Document, Meta};

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(alias = "document", alias = "text")]
    content: Option<String>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    id: Option<serde_json::Value>,
}

/// Records that could not be turned into documents, with the reason.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<Error>,
}

/// Load a JSON array of `{content, metadata: {source, resource_type?, ..}, id}`
/// records. Malformed records are skipped and reported, never fatal.
pub fn load_json_records(path: &Path) -> anyhow::Result<LoadReport> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
    parse_json_records(&raw)
}

pub fn parse_json_records(raw: &str) -> anyhow::Result<LoadReport> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| Error::Ingestion { record: "<file>".into(), reason: format!("not a JSON array: {e}") })?;

    let mut report = LoadReport::default();
    for (idx, value) in values.into_iter().enumerate() {
        match record_to_document(idx, value) {
            Ok(doc) => report.documents.push(doc),
            Err(e) => {
                warn!(record = idx, error = %e, "skipping ingestion record");
                report.skipped.push(e);
            }
        }
    }
    info!(loaded = report.documents.len(), skipped = report.skipped.len(), "loaded ingestion records");
    Ok(report)
}

fn record_to_document(idx: usize, value: serde_json::Value) -> Result<Document, Error> {
    let label = format!("#{idx}");
    let rec: RawRecord = serde_json::from_value(value)
        .map_err(|e| Error::Ingestion { record: label.clone(), reason: e.to_string() })?;

    let text = rec
        .content
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::Ingestion { record: label.clone(), reason: "missing text payload".into() })?;

    let mut metadata: Meta = rec
        .metadata
        .into_iter()
        .map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, s)
        })
        .collect();

    let source = metadata
        .remove("source")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Ingestion { record: label.clone(), reason: "metadata.source is required".into() })?;
    let resource_type = metadata.remove("resource_type");

    let id = match rec.id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => format!("doc_{idx}"),
    };

    Ok(Document { id, source, resource_type, text, metadata })
}

/// Walk `root` for `.md` and `.txt` files. `source` is the path relative to
/// `root`; `resource_type` is the parent directory name when there is one.
pub fn load_directory(root: &Path) -> anyhow::Result<LoadReport> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!("{} is not a directory", root.display())).into());
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| matches!(p.extension().and_then(|s| s.to_str()), Some("md" | "txt")))
        .collect();
    files.sort();

    let mut report = LoadReport::default();
    for path in files {
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let source = rel.to_string_lossy().replace('\\', "/");
        let text = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                let err = Error::Ingestion { record: source.clone(), reason: e.to_string() };
                warn!(error = %err, "skipping unreadable file");
                report.skipped.push(err);
                continue;
            }
        };
        let resource_type = rel
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().into_owned());
        let id = rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.clone());
        report.documents.push(Document { id, source, resource_type, text, metadata: Meta::new() });
    }
    info!(root = %root.display(), files = report.documents.len(), "loaded directory");
    Ok(report)
}
