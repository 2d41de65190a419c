use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::{doc, Index, IndexReader, ReloadPolicy, TantivyDocument};
use tracing::{debug, info};

use opsrag_core::traits::LexicalIndex;
use opsrag_core::types::{Chunk, ChunkId, SearchHit, SourceKind};

use crate::tantivy_utils::{chunk_schema, register_tokenizer, ChunkFields};

/// One immutable generation of the index.
struct Snapshot {
	index: Index,
	reader: IndexReader,
	fields: ChunkFields,
	chunks: HashMap<ChunkId, Chunk>,
}

impl Snapshot {
	fn build(chunks: &[Chunk]) -> Result<Self> {
		let (schema, fields) = chunk_schema();
		let index = Index::create_in_ram(schema);
		register_tokenizer(&index);

		let mut by_id = HashMap::with_capacity(chunks.len());
		let mut index_writer = index.writer(50_000_000)?;
		for c in chunks {
			if by_id.contains_key(&c.id) {
				continue;
			}
			index_writer.add_document(doc!(
				fields.id => c.id.clone(),
				fields.text => c.text.clone(),
				fields.heading => c.meta.heading.clone(),
				fields.resource_type => c.meta.resource_type.clone(),
			))?;
			by_id.insert(c.id.clone(), c.clone());
		}
		index_writer.commit()?;

		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { index, reader, fields, chunks: by_id })
	}

	fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
		if k == 0 || self.chunks.is_empty() || !query.chars().any(char::is_alphanumeric) {
			return Ok(Vec::new());
		}
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.fields.text, self.fields.heading]);
		let (q, errors) = qp.parse_query_lenient(&sanitize_query(query));
		if !errors.is_empty() {
			debug!(?errors, "lenient query parse dropped terms");
		}
		let top_docs = searcher.search(&q, &TopDocs::with_limit(k))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let id = doc.get_first(self.fields.id).and_then(|v| v.as_str()).unwrap_or("");
			if let Some(chunk) = self.chunks.get(id) {
				hits.push(SearchHit { chunk: chunk.clone(), score, source: SourceKind::Sparse });
			}
		}
		Ok(hits)
	}
}

/// Query syntax characters are replaced by spaces; questions are free text.
fn sanitize_query(query: &str) -> String {
	query.chars().map(|c| if c.is_alphanumeric() { c } else { ' ' }).collect()
}

/// In-memory BM25 index with swap-in rebuilds: searches hold an `Arc` to the
/// generation they started on, so a rebuild never exposes a partial index.
pub struct TantivyLexicalIndex {
	current: RwLock<Arc<Snapshot>>,
}

impl TantivyLexicalIndex {
	pub fn new() -> Result<Self> {
		Ok(Self { current: RwLock::new(Arc::new(Snapshot::build(&[])?)) })
	}

	fn snapshot(&self) -> Result<Arc<Snapshot>> {
		self.current
			.read()
			.map(|guard| Arc::clone(&guard))
			.map_err(|_| anyhow!("lexical index lock poisoned"))
	}

	/// Counts of indexed chunks per resource type.
	pub fn resource_type_counts(&self) -> Result<Vec<(String, usize)>> {
		let snap = self.snapshot()?;
		let mut counts: HashMap<&str, usize> = HashMap::new();
		for c in snap.chunks.values() {
			*counts.entry(c.meta.resource_type.as_str()).or_default() += 1;
		}
		let mut out: Vec<(String, usize)> = counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
		out.sort();
		Ok(out)
	}
}

impl LexicalIndex for TantivyLexicalIndex {
	fn rebuild(&self, chunks: &[Chunk]) -> Result<()> {
		let next = Arc::new(Snapshot::build(chunks)?);
		let size = next.chunks.len();
		let mut guard = self.current.write().map_err(|_| anyhow!("lexical index lock poisoned"))?;
		*guard = next;
		info!(chunks = size, "lexical index rebuilt");
		Ok(())
	}

	fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
		self.snapshot()?.search(query, k)
	}

	fn len(&self) -> usize {
		self.snapshot().map(|s| s.chunks.len()).unwrap_or(0)
	}
}
