//! Embedded engine: tantivy for lexical queries, LanceDB for kNN.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<index>/schema.json   written last, marks a complete index
//! <root>/<index>/text/         tantivy index
//! <root>/<index>/vectors/      LanceDB table
//! ```

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use hopsearch_core::query::{IndexQuery, SearchRequest};
use hopsearch_core::scan::{ScanCursor, ScanPage};
use hopsearch_core::schema::IndexSchema;
use hopsearch_core::traits::IndexEngine;
use hopsearch_core::types::{Chunk, SearchHit};
use hopsearch_core::{Error, Result};
use hopsearch_text::TextStore;
use hopsearch_vector::VectorStore;

const SCHEMA_FILE: &str = "schema.json";

struct LocalIndex {
    schema: IndexSchema,
    text: TextStore,
    vectors: VectorStore,
}

pub struct LocalEngine {
    root: PathBuf,
    open: RwLock<HashMap<String, Arc<LocalIndex>>>,
}

impl LocalEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, index: &str) -> Result<PathBuf> {
        let valid = !index.is_empty()
            && index != "."
            && index != ".."
            && !index.contains(['/', '\\'])
            && !index.starts_with('.');
        if !valid {
            return Err(Error::InvalidConfig(format!("invalid index name '{index}'")));
        }
        Ok(self.root.join(index))
    }

    fn cached(&self, index: &str) -> Option<Arc<LocalIndex>> {
        self.open.read().ok()?.get(index).cloned()
    }

    fn remember(&self, index: &str, handle: LocalIndex) -> Arc<LocalIndex> {
        let handle = Arc::new(handle);
        match self.open.write() {
            Ok(mut open) => Arc::clone(open.entry(index.to_string()).or_insert(handle)),
            Err(_) => handle,
        }
    }

    async fn handle(&self, index: &str) -> Result<Arc<LocalIndex>> {
        if let Some(h) = self.cached(index) {
            return Ok(h);
        }
        let dir = self.dir(index)?;
        let schema_path = dir.join(SCHEMA_FILE);
        if !schema_path.exists() {
            return Err(Error::Engine(anyhow!("index '{index}' does not exist under {}", self.root.display())));
        }
        let raw = std::fs::read_to_string(&schema_path)
            .with_context(|| format!("read {}", schema_path.display()))?;
        let schema: IndexSchema = serde_json::from_str(&raw)?;
        let text = TextStore::open(&dir.join("text"))?;
        let vectors = VectorStore::open(&dir.join("vectors"), schema.vector_field.dims, schema.vector_field.similarity).await?;
        debug!(index, "opened local index");
        Ok(self.remember(index, LocalIndex { schema, text, vectors }))
    }
}

#[async_trait]
impl IndexEngine for LocalEngine {
    fn base_uri(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.dir(index)?.join(SCHEMA_FILE).exists())
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        schema.validate()?;
        let dir = self.dir(index)?;
        if dir.join(SCHEMA_FILE).exists() {
            return Err(Error::IndexAlreadyExists(index.to_string()));
        }
        std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let text = TextStore::create(&dir.join("text"), schema.text_field.analyzer.as_deref())?;
        let vectors = VectorStore::create(&dir.join("vectors"), schema.vector_field.dims, schema.vector_field.similarity).await?;
        std::fs::write(dir.join(SCHEMA_FILE), serde_json::to_vec_pretty(schema)?)
            .with_context(|| format!("write schema of '{index}'"))?;
        self.remember(
            index,
            LocalIndex {
                schema: schema.clone(),
                text,
                vectors,
            },
        );
        info!(index, dims = schema.vector_field.dims, "created local index");
        Ok(())
    }

    async fn bulk_write(&self, index: &str, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let h = self.handle(index).await?;
        let dims = h.schema.vector_field.dims;
        let mut rows: Vec<(&str, &[f32])> = Vec::with_capacity(chunks.len());
        for c in chunks {
            let v = c
                .embedding()
                .ok_or_else(|| Error::Operation(format!("chunk '{}' has no embedding", c.id)))?;
            if v.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    actual: v.len(),
                });
            }
            rows.push((c.id.as_str(), v));
        }
        h.text.add(chunks)?;
        h.vectors.add(&rows).await?;
        Ok(chunks.len())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let h = self.handle(index).await?;
        match &request.query {
            IndexQuery::Knn {
                vector,
                k,
                num_candidates,
                filter,
                ..
            } => {
                let dims = h.schema.vector_field.dims;
                if vector.len() != dims {
                    return Err(Error::DimensionMismatch {
                        expected: dims,
                        actual: vector.len(),
                    });
                }
                let filters = parse_filters(filter.iter())?;
                let limit = (*k).min(request.size);
                let fetch = if filters.is_empty() { limit } else { (*num_candidates).max(limit) };
                let mut hits = Vec::with_capacity(limit);
                for (id, score) in h.vectors.search(vector, fetch).await? {
                    if hits.len() == limit {
                        break;
                    }
                    let Some(chunk) = h.text.get(&id)? else {
                        continue;
                    };
                    if matches_all(&filters, &chunk)? {
                        hits.push(SearchHit { chunk, score });
                    }
                }
                Ok(hits)
            }
            query => {
                let mut raw = Vec::new();
                collect_filters(query, &mut raw);
                let filters = parse_filters(raw.into_iter())?;
                let fetch = if filters.is_empty() {
                    request.size
                } else {
                    h.text.count().max(request.size)
                };
                let mut hits = Vec::with_capacity(request.size);
                for (score, chunk) in h.text.search(query, &h.schema.text_field.name, fetch)? {
                    if hits.len() == request.size {
                        break;
                    }
                    if matches_all(&filters, &chunk)? {
                        hits.push(SearchHit { chunk, score });
                    }
                }
                Ok(hits)
            }
        }
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Chunk>> {
        let h = self.handle(index).await?;
        Ok(h.text.get(id)?)
    }

    async fn scan(&self, index: &str, page_size: usize, after: Option<&ScanCursor>) -> Result<ScanPage> {
        let h = self.handle(index).await?;
        let after = match after {
            None => None,
            Some(cursor) => Some(
                cursor
                    .0
                    .first()
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::InvalidConfig(format!("malformed scan cursor {:?}", cursor.0)))?,
            ),
        };
        let page = h.text.scan(after, page_size)?;
        let cursor = page.last().map(|(ordinal, _)| ScanCursor(vec![Value::from(*ordinal)]));
        Ok(ScanPage {
            hits: page.into_iter().map(|(_, c)| c).collect(),
            cursor,
        })
    }

    async fn count(&self, index: &str) -> Result<usize> {
        Ok(self.handle(index).await?.text.count())
    }
}

/// `metadata.<field>` term filter.
struct TermFilter {
    field: String,
    value: Value,
}

fn collect_filters<'a>(query: &'a IndexQuery, out: &mut Vec<&'a Value>) {
    if let IndexQuery::Bool(b) = query {
        out.extend(b.filter.iter());
        for q in &b.must {
            collect_filters(q, out);
        }
    }
}

fn parse_filters<'a>(raw: impl Iterator<Item = &'a Value>) -> Result<Vec<TermFilter>> {
    raw.map(parse_filter).collect()
}

fn parse_filter(raw: &Value) -> Result<TermFilter> {
    let unsupported = || Error::InvalidConfig(format!("unsupported filter for the local engine: {raw}"));
    let term = raw
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.get("term"))
        .and_then(Value::as_object)
        .filter(|t| t.len() == 1)
        .ok_or_else(unsupported)?;
    let (key, value) = term.iter().next().ok_or_else(unsupported)?;
    let field = key.strip_prefix("metadata.").ok_or_else(unsupported)?;
    let value = match value {
        Value::Object(o) => o.get("value").cloned().ok_or_else(unsupported)?,
        v => v.clone(),
    };
    Ok(TermFilter {
        field: field.to_string(),
        value,
    })
}

fn matches_all(filters: &[TermFilter], chunk: &Chunk) -> Result<bool> {
    if filters.is_empty() {
        return Ok(true);
    }
    let metadata = serde_json::to_value(&chunk.metadata)?;
    Ok(filters.iter().all(|f| match metadata.get(&f.field) {
        Some(Value::Array(items)) => items.contains(&f.value),
        Some(v) => v == &f.value,
        None => false,
    }))
}
