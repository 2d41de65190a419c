//! Decoding of chunk rows read back from LanceDB.

use anyhow::{anyhow, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, StringArray, TimestampMillisecondArray};
use chrono::{DateTime, Utc};

use opsrag_core::types::{Chunk, ChunkMeta, EmbeddedChunk, Meta};

fn col<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<T>())
		.ok_or_else(|| anyhow!("column '{}' missing or mistyped", name))
}

/// Filter expression selecting rows written by one embedder.
pub fn embedder_filter(embedder_id: &str) -> String {
	format!("embedder_id = '{}'", embedder_id.replace('\'', "''"))
}

pub fn decode_rows(batch: &RecordBatch) -> Result<Vec<EmbeddedChunk>> {
	let ids = col::<StringArray>(batch, "id")?;
	let texts = col::<StringArray>(batch, "text")?;
	let sources = col::<StringArray>(batch, "source")?;
	let doc_ids = col::<StringArray>(batch, "doc_id")?;
	let headings = col::<StringArray>(batch, "heading")?;
	let resource_types = col::<StringArray>(batch, "resource_type")?;
	let ordinals = col::<Int32Array>(batch, "ordinal")?;
	let ingested = col::<TimestampMillisecondArray>(batch, "ingested_at")?;
	let metas = col::<StringArray>(batch, "meta_json")?;
	let embedder_ids = col::<StringArray>(batch, "embedder_id")?;
	let hashes = col::<StringArray>(batch, "content_hash")?;
	let vectors = col::<FixedSizeListArray>(batch, "vector")?;

	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let embedding = if vectors.is_valid(i) {
			vectors.value(i).as_primitive::<Float32Type>().values().to_vec()
		} else {
			Vec::new()
		};
		let extra: Meta = serde_json::from_str(metas.value(i)).unwrap_or_default();
		let ingested_at: DateTime<Utc> = DateTime::<Utc>::from_timestamp_millis(ingested.value(i)).unwrap_or_default();
		out.push(EmbeddedChunk {
			chunk: Chunk {
				id: ids.value(i).to_string(),
				text: texts.value(i).to_string(),
				meta: ChunkMeta {
					source: sources.value(i).to_string(),
					doc_id: doc_ids.value(i).to_string(),
					heading: headings.value(i).to_string(),
					resource_type: resource_types.value(i).to_string(),
					ordinal: usize::try_from(ordinals.value(i)).unwrap_or_default(),
					ingested_at,
					extra,
				},
			},
			embedding,
			embedder_id: embedder_ids.value(i).to_string(),
			content_hash: hashes.value(i).to_string(),
		});
	}
	Ok(out)
}

/// Cosine distance column from a vector query, as similarity (1 - distance).
pub fn similarities(batch: &RecordBatch) -> Result<Vec<f32>> {
	let distances = col::<Float32Array>(batch, "_distance")?;
	Ok((0..batch.num_rows()).map(|i| 1.0 - distances.value(i)).collect())
}
