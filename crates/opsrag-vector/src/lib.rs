//! Vector stores for embedded chunks.
//!
//! `LanceVectorStore` persists rows in a LanceDB table under the configured
//! directory; `MemoryVectorStore` keeps them in process. Both filter searches
//! by embedder id so vectors from different models are never compared.
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use arrow_array::RecordBatchIterator;
use std::path::Path;
use tracing::{debug, info};

use opsrag_core::error::Error;
use opsrag_core::traits::VectorStore;
use opsrag_core::types::{EmbeddedChunk, SearchHit, SourceKind};

pub mod memory;
pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

pub use memory::{cosine_similarity, MemoryVectorStore};

use crate::schema::{build_chunk_schema, vector_dim};
use crate::search::{decode_rows, embedder_filter, similarities};
use crate::writer::to_record_batch;

pub struct LanceVectorStore {
	db: Connection,
	table_name: String,
	dim: i32,
}

impl LanceVectorStore {
	/// Open (or create) the chunk table. An existing table with a different
	/// vector width is a configuration error; rebuild with a fresh store.
	pub async fn open(db_path: &Path, table_name: &str, dim: usize) -> Result<Self> {
		let dim = i32::try_from(dim)?;
		let db = table::connect_with_table(db_path, table_name, build_chunk_schema(dim)).await?;
		let existing = db.open_table(table_name).execute().await?.schema().await?;
		if let Some(found) = vector_dim(&existing) {
			if found != dim {
				return Err(Error::InvalidConfig(format!(
					"vector store {} holds {found}-dim vectors but the embedder produces {dim}; re-ingest with --fresh",
					db_path.display()
				))
				.into());
			}
		}
		info!(path = %db_path.display(), table = table_name, dim, "vector store opened");
		Ok(Self { db, table_name: table_name.to_string(), dim })
	}
}

#[async_trait]
impl VectorStore for LanceVectorStore {
	async fn add(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
		if chunks.is_empty() { return Ok(()); }
		let record_batch = to_record_batch(chunks, self.dim)?;
		let schema = record_batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
		self.db.open_table(&self.table_name).execute().await?.add(reader).execute().await?;
		debug!(rows = chunks.len(), "appended chunks to vector store");
		Ok(())
	}

	async fn search(&self, query: &[f32], embedder_id: &str, k: usize) -> Result<Vec<SearchHit>> {
		let table = self.db.open_table(&self.table_name).execute().await?;
		if k == 0 || table.count_rows(Some(embedder_filter(embedder_id))).await? == 0 {
			return Ok(Vec::new());
		}
		let mut stream = table
			.vector_search(query.to_vec())?
			.distance_type(DistanceType::Cosine)
			.only_if(embedder_filter(embedder_id))
			.limit(k)
			.execute()
			.await?;
		let mut hits = Vec::new();
		while let Some(batch) = TryStreamExt::try_next(&mut stream).await? {
			let rows = decode_rows(&batch)?;
			let scores = similarities(&batch)?;
			for (row, score) in rows.into_iter().zip(scores) {
				hits.push(SearchHit { chunk: row.chunk, score, source: SourceKind::Dense });
			}
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
		hits.truncate(k);
		Ok(hits)
	}

	async fn load_all(&self) -> Result<Vec<EmbeddedChunk>> {
		let table = self.db.open_table(&self.table_name).execute().await?;
		let mut stream = table.query().execute().await?;
		let mut out = Vec::new();
		while let Some(batch) = TryStreamExt::try_next(&mut stream).await? {
			out.extend(decode_rows(&batch)?);
		}
		Ok(out)
	}

	async fn count(&self) -> Result<usize> {
		let table = self.db.open_table(&self.table_name).execute().await?;
		Ok(table.count_rows(None).await?)
	}
}
