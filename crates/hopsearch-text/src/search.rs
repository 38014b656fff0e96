use anyhow::{anyhow, bail, Result};
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{DocAddress, Order, Searcher, TantivyDocument, Term};

use hopsearch_core::query::{IndexQuery, TITLE_FIELD};
use hopsearch_core::types::{Chunk, ChunkMetadata};

use crate::index::TextStore;

impl TextStore {
	/// BM25 search. `text_field` is the name the caller uses for the chunk
	/// text; bool filters are left to the caller.
	pub fn search(&self, query: &IndexQuery, text_field: &str, limit: usize) -> Result<Vec<(f32, Chunk)>> {
		if limit == 0 {
			return Ok(vec![]);
		}
		let compiled = self.compile(query, text_field)?;
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&compiled, &TopDocs::with_limit(limit))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			hits.push((score, self.load(&searcher, addr)?));
		}
		Ok(hits)
	}

	pub fn get(&self, id: &str) -> Result<Option<Chunk>> {
		let searcher = self.reader.searcher();
		let q = TermQuery::new(Term::from_field_text(self.fields.id, id), IndexRecordOption::Basic);
		match searcher.search(&q, &TopDocs::with_limit(1))?.first() {
			Some((_, addr)) => Ok(Some(self.load(&searcher, *addr)?)),
			None => Ok(None),
		}
	}

	/// Documents in write order, starting after ordinal `after`.
	pub fn scan(&self, after: Option<u64>, limit: usize) -> Result<Vec<(u64, Chunk)>> {
		if limit == 0 {
			return Ok(vec![]);
		}
		let offset = after.map_or(0, |a| a as usize + 1);
		let searcher = self.reader.searcher();
		let collector = TopDocs::with_limit(limit).and_offset(offset).order_by_fast_field::<u64>("ordinal", Order::Asc);
		let page = searcher.search(&AllQuery, &collector)?;
		page.into_iter().map(|(ordinal, addr)| Ok((ordinal, self.load(&searcher, addr)?))).collect()
	}

	fn load(&self, searcher: &Searcher, addr: DocAddress) -> Result<Chunk> {
		let doc: TantivyDocument = searcher.doc(addr)?;
		let text_of = |f: Field| doc.get_first(f).and_then(|v| v.as_str()).map(str::to_string);
		let id = text_of(self.fields.id).ok_or_else(|| anyhow!("stored document without id"))?;
		let text = text_of(self.fields.content).unwrap_or_default();
		let metadata: ChunkMetadata = match text_of(self.fields.metadata) {
			Some(raw) => serde_json::from_str(&raw)?,
			None => ChunkMetadata::default(),
		};
		Ok(Chunk::new(id, text, metadata))
	}

	fn compile(&self, query: &IndexQuery, text_field: &str) -> Result<Box<dyn Query>> {
		match query {
			IndexQuery::MatchAll => Ok(Box::new(AllQuery)),
			IndexQuery::Match { field, text } => {
				let target = if field == text_field {
					self.fields.content
				} else if field == TITLE_FIELD || field == "title" {
					self.fields.title
				} else {
					bail!("field '{}' is not searchable", field);
				};
				self.match_terms(target, text)
			}
			IndexQuery::Bool(b) => {
				let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
				for q in &b.must {
					clauses.push((Occur::Must, self.compile(q, text_field)?));
				}
				for q in &b.should {
					clauses.push((Occur::Should, self.compile(q, text_field)?));
				}
				if clauses.is_empty() {
					return Ok(Box::new(AllQuery));
				}
				Ok(Box::new(BooleanQuery::new(clauses)))
			}
			IndexQuery::Knn { .. } => bail!("kNN queries are not served by the text store"),
		}
	}

	/// Analyzes `text` with the field's tokenizer and matches any resulting
	/// term, like an engine `match` query.
	fn match_terms(&self, field: Field, text: &str) -> Result<Box<dyn Query>> {
		let mut analyzer = self.index.tokenizer_for_field(field)?;
		let mut stream = analyzer.token_stream(text);
		let mut terms: Vec<(Occur, Box<dyn Query>)> = Vec::new();
		while stream.advance() {
			let term = Term::from_field_text(field, &stream.token().text);
			terms.push((Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))));
		}
		if terms.is_empty() {
			return Ok(Box::new(EmptyQuery));
		}
		Ok(Box::new(BooleanQuery::new(terms)))
	}
}
