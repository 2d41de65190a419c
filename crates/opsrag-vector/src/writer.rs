use anyhow::{ensure, Result};
use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, StringArray, TimestampMillisecondArray};
use std::sync::Arc;

use opsrag_core::types::EmbeddedChunk;

use crate::schema::build_chunk_schema;

pub fn to_record_batch(chunks: &[EmbeddedChunk], dim: i32) -> Result<RecordBatch> {
	let schema = build_chunk_schema(dim);
	let mut ids = Vec::with_capacity(chunks.len());
	let mut texts = Vec::with_capacity(chunks.len());
	let mut sources = Vec::with_capacity(chunks.len());
	let mut doc_ids = Vec::with_capacity(chunks.len());
	let mut headings = Vec::with_capacity(chunks.len());
	let mut resource_types = Vec::with_capacity(chunks.len());
	let mut ordinals = Vec::with_capacity(chunks.len());
	let mut ingested = Vec::with_capacity(chunks.len());
	let mut metas = Vec::with_capacity(chunks.len());
	let mut embedder_ids = Vec::with_capacity(chunks.len());
	let mut hashes = Vec::with_capacity(chunks.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());

	for ec in chunks {
		ensure!(
			ec.embedding.len() == dim as usize,
			"chunk {} has a {}-dim embedding, store expects {}",
			ec.chunk.id,
			ec.embedding.len(),
			dim
		);
		let m = &ec.chunk.meta;
		ids.push(ec.chunk.id.clone());
		texts.push(ec.chunk.text.clone());
		sources.push(m.source.clone());
		doc_ids.push(m.doc_id.clone());
		headings.push(m.heading.clone());
		resource_types.push(m.resource_type.clone());
		ordinals.push(i32::try_from(m.ordinal)?);
		ingested.push(m.ingested_at.timestamp_millis());
		metas.push(serde_json::to_string(&m.extra)?);
		embedder_ids.push(ec.embedder_id.clone());
		hashes.push(ec.content_hash.clone());
		vectors.push(Some(ec.embedding.iter().map(|&x| Some(x)).collect()));
	}

	let record_batch = RecordBatch::try_new(schema, vec![
		Arc::new(StringArray::from(ids)),
		Arc::new(StringArray::from(texts)),
		Arc::new(StringArray::from(sources)),
		Arc::new(StringArray::from(doc_ids)),
		Arc::new(StringArray::from(headings)),
		Arc::new(StringArray::from(resource_types)),
		Arc::new(Int32Array::from(ordinals)),
		Arc::new(TimestampMillisecondArray::from(ingested)),
		Arc::new(StringArray::from(metas)),
		Arc::new(StringArray::from(embedder_ids)),
		Arc::new(StringArray::from(hashes)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), dim)),
	])?;
	Ok(record_batch)
}
