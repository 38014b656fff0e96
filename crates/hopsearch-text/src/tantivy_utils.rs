//! hopsearch-text
//!
//! Tantivy-backed lexical store: one tantivy index per search index, holding
//! the chunk text, its title and its metadata.
use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, INDEXED, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;
use tracing::warn;

pub const STOPWORDS_TOKENIZER: &str = "stopwords";

#[derive(Debug, Clone, Copy)]
pub struct TextFields {
	pub id: Field,
	pub ordinal: Field,
	pub content: Field,
	pub title: Field,
	pub metadata: Field,
}

impl TextFields {
	pub fn from_schema(schema: &Schema) -> tantivy::Result<Self> {
		Ok(Self {
			id: schema.get_field("id")?,
			ordinal: schema.get_field("ordinal")?,
			content: schema.get_field("content")?,
			title: schema.get_field("title")?,
			metadata: schema.get_field("metadata")?,
		})
	}
}

/// Maps an engine analyzer name onto a tantivy tokenizer name.
pub fn resolve_analyzer(name: Option<&str>) -> &'static str {
	match name {
		None | Some("standard") | Some("default") | Some("simple") => "default",
		Some("english") | Some("en_stem") => "en_stem",
		Some("stop") | Some(STOPWORDS_TOKENIZER) => STOPWORDS_TOKENIZER,
		Some("whitespace") => "whitespace",
		Some(other) => {
			warn!(analyzer = other, "unknown analyzer, using default");
			"default"
		}
	}
}

pub fn build_schema(analyzer: &str) -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	schema_builder.add_u64_field("ordinal", INDEXED | STORED | FAST);
	let content_indexing = TextFieldIndexing::default().set_tokenizer(analyzer).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	schema_builder.add_text_field("content", TextOptions::default().set_indexing_options(content_indexing).set_stored());
	let title_indexing = TextFieldIndexing::default().set_tokenizer(analyzer).set_index_option(IndexRecordOption::WithFreqs);
	schema_builder.add_text_field("title", TextOptions::default().set_indexing_options(title_indexing));
	schema_builder.add_text_field("metadata", STORED);
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = vec![
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(STOPWORDS_TOKENIZER, tokenizer);
}
