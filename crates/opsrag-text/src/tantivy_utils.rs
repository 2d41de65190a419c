use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TOKENIZER: &str = "ops_text";

/// English function words. Negations and modal verbs are kept out of the
/// list because questions like "pod not ready" or "why can't it pull" hinge on them.
const STOP_WORDS: &[&str] = &[
	"a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "its", "of", "on",
	"or", "that", "the", "this", "these", "those", "to", "was", "were", "with", "so", "if", "then", "than",
	"do", "does", "did", "have", "had", "i", "me", "my", "we", "our", "you", "your",
];

/// Handles to the indexed fields of a chunk document.
pub struct ChunkFields {
	pub id: Field,
	pub text: Field,
	pub heading: Field,
	pub resource_type: Field,
}

/// `text` and `heading` are analysed with [`TOKENIZER`]; `id` and
/// `resource_type` are exact-match keywords.
pub fn chunk_schema() -> (Schema, ChunkFields) {
	let analysed = TextOptions::default().set_indexing_options(
		TextFieldIndexing::default()
			.set_tokenizer(TOKENIZER)
			.set_index_option(IndexRecordOption::WithFreqsAndPositions),
	);
	let mut builder = Schema::builder();
	let fields = ChunkFields {
		id: builder.add_text_field("id", STRING | STORED),
		text: builder.add_text_field("text", analysed.clone()),
		heading: builder.add_text_field("heading", analysed),
		resource_type: builder.add_text_field("resource_type", STRING | STORED),
	};
	(builder.build(), fields)
}

pub fn register_tokenizer(index: &Index) {
	let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|w| w.to_string())))
		.build();
	index.tokenizers().register(TOKENIZER, analyzer);
}

#[cfg(test)]
mod tests {
	use super::*;
	use tantivy::tokenizer::TokenStream;

	#[test]
	fn negations_survive_analysis() {
		let (schema, _) = chunk_schema();
		let index = Index::create_in_ram(schema);
		register_tokenizer(&index);
		let mut analyzer = index.tokenizers().get(TOKENIZER).expect("registered");
		let mut stream = analyzer.token_stream("The Pod is NOT ready");
		let mut tokens = Vec::new();
		while let Some(t) = stream.next() {
			tokens.push(t.text.clone());
		}
		assert_eq!(tokens, vec!["pod", "not", "ready"]);
	}
}
