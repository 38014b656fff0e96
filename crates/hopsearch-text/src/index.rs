use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::debug;

use hopsearch_core::types::Chunk;

use crate::tantivy_utils::{build_schema, register_tokenizer, resolve_analyzer, TextFields};

/// Lexical side of one search index.
///
/// Documents get consecutive ordinals starting at 0 in write order. The store
/// is append-only, so ordinal `n` is always the `n`-th document written.
pub struct TextStore {
	pub(crate) index: Index,
	pub(crate) reader: IndexReader,
	writer: Mutex<IndexWriter>,
	pub(crate) fields: TextFields,
}

impl TextStore {
	/// Creates a new tantivy index in `dir`. Fails if one is already there.
	pub fn create(dir: &Path, analyzer: Option<&str>) -> Result<Self> {
		if dir.join("meta.json").exists() {
			bail!("text index already exists at {}", dir.display());
		}
		std::fs::create_dir_all(dir)?;
		let schema = build_schema(resolve_analyzer(analyzer));
		let index = Index::create_in_dir(dir, schema).with_context(|| format!("create text index in {}", dir.display()))?;
		Self::from_index(index)
	}

	pub fn open(dir: &Path) -> Result<Self> {
		let index = Index::open_in_dir(dir).with_context(|| format!("open text index in {}", dir.display()))?;
		Self::from_index(index)
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = TextFields::from_schema(&index.schema())?;
		let writer: IndexWriter = index.writer(50_000_000)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { index, reader, writer: Mutex::new(writer), fields })
	}

	/// Appends chunks and commits. Nothing is kept if any document fails.
	pub fn add(&self, chunks: &[Chunk]) -> Result<usize> {
		let mut writer = self.writer.lock().map_err(|_| anyhow!("text index writer lock poisoned"))?;
		let base = self.reader.searcher().num_docs();
		let result = (|| -> Result<()> {
			for (i, c) in chunks.iter().enumerate() {
				let metadata = serde_json::to_string(&c.metadata)?;
				writer.add_document(doc!(
					self.fields.id => c.id.clone(),
					self.fields.ordinal => base + i as u64,
					self.fields.content => c.text.clone(),
					self.fields.title => c.metadata.title.clone(),
					self.fields.metadata => metadata,
				))?;
			}
			writer.commit()?;
			Ok(())
		})();
		if let Err(e) = result {
			writer.rollback()?;
			return Err(e);
		}
		self.reader.reload()?;
		debug!(added = chunks.len(), total = base + chunks.len() as u64, "text index committed");
		Ok(chunks.len())
	}

	pub fn count(&self) -> usize {
		self.reader.searcher().num_docs() as usize
	}
}
