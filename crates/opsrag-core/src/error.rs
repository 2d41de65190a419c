use thiserror::Error;

/// Failure taxonomy of the retrieval and orchestration engine.
///
/// Only `InvalidConfig` is fatal at startup. The remaining variants are
/// recovered close to where they happen: ingestion and embedding errors skip
/// the affected record or chunk, retrieval errors empty one leg, tool errors
/// are fed back to the LLM, LLM errors end the current turn.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Ingestion failed for record {record}: {reason}")]
    Ingestion { record: String, reason: String },

    #[error("Embedding failed for chunk {chunk}: {reason}")]
    Embedding { chunk: String, reason: String },

    #[error("Retrieval unavailable ({leg}): {reason}")]
    Retrieval { leg: &'static str, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("Could not parse tool request: {0}")]
    ToolRequestParse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
