//! opsrag-text
//!
//! BM25 keyword index over the accepted chunk corpus. The index lives in RAM
//! and is rebuilt from the vector store's corpus at startup and after bulk
//! ingestion; a rebuild swaps the whole index in at once.
pub mod tantivy_utils;
pub mod index;

pub use index::TantivyLexicalIndex;
