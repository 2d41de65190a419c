//! Domain types shared by the chunker, the engines and the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

/// A raw input document. Immutable once ingested.
///
/// - `id`: caller-supplied identifier
/// - `source`: provenance (file path, doc set name, URL)
/// - `resource_type`: optional tag such as "pod" or "troubleshooting"
/// - `metadata`: opaque key/value pairs carried onto every chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub resource_type: Option<String>,
    pub text: String,
    #[serde(default)]
    pub metadata: Meta,
}

/// Provenance attached to every chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMeta {
    pub source: String,
    pub doc_id: String,
    pub heading: String,
    pub resource_type: String,
    pub ordinal: usize,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: Meta,
}

/// A bounded span of document text, the unit of indexing and retrieval.
///
/// `id` is derived from the source key and the chunk ordinal, so chunking the
/// same document twice yields the same ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub meta: ChunkMeta,
}

/// A chunk as written to the vector store: text, metadata and its embedding.
///
/// `embedder_id` names the model that produced `embedding`; vectors from
/// different models are never compared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub embedder_id: String,
    pub content_hash: String,
}

/// Indicates which retrieval leg produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dense,
    Sparse,
    Hybrid,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Dense => "dense",
            SourceKind::Sparse => "sparse",
            SourceKind::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// The minimal surface returned by one retrieval leg.
///
/// `score` is leg-specific but higher is always better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
    pub source: SourceKind,
}

/// A fused candidate produced per query. Ranks are 1-based and `None` when
/// the chunk was absent from that leg.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub origin: SourceKind,
    pub score: f32,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
}

/// Final retrieval output: `{text, metadata, score}` plus the leg it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMeta,
    pub score: f32,
    pub origin: SourceKind,
}

impl From<Candidate> for RetrievedChunk {
    fn from(c: Candidate) -> Self {
        Self { id: c.chunk.id, text: c.chunk.text, metadata: c.chunk.meta, score: c.score, origin: c.origin }
    }
}

/// A scalar tool argument. Nested JSON is flattened to its string form when
/// a directive is parsed, so arguments stay scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl ArgValue {
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ArgValue::Null,
            Value::Bool(b) => ArgValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ArgValue::Int(i),
                None => ArgValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => ArgValue::Str(s.clone()),
            other => ArgValue::Str(other.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            ArgValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Float(x) => write!(f, "{x}"),
            ArgValue::Str(s) => f.write_str(s),
            ArgValue::Null => f.write_str("null"),
        }
    }
}

pub type ToolArgs = BTreeMap<String, ArgValue>;

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: ToolArgs,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into(), args: ToolArgs::new() }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: ArgValue) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(ArgValue::as_str).filter(|s| !s.is_empty())
    }
}

/// Outcome of one dispatch: structured payload or an error marker.
///
/// Serializes as `{"ok": payload}` or `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResult {
    Ok(serde_json::Value),
    Error { tool: String, args: ToolArgs, reason: String },
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok(_))
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            ToolResult::Ok(v) => Some(v),
            ToolResult::Error { .. } => None,
        }
    }

    pub fn error_reason(&self) -> Option<&str> {
        match self {
            ToolResult::Error { reason, .. } => Some(reason),
            ToolResult::Ok(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Assistant => f.write_str("Assistant"),
        }
    }
}

/// One message of a session. Sessions only ever append turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into(), timestamp: Utc::now() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into(), timestamp: Utc::now() }
    }
}
