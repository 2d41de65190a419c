//! Shared domain model for the ops knowledge engine.
//!
//! Types, seam traits, the error taxonomy, layered configuration
//! (`config.toml` + `config.<env>.toml` + `APP_*` env vars), the document
//! chunker and ingestion-record loading.

pub mod chunker;
pub mod config;
pub mod error;
pub mod records;
pub mod traits;
pub mod types;

pub use chunker::{Chunker, ChunkingConfig};
pub use config::{Config, Settings};
pub use error::{Error, Result};
