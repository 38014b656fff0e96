#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hopsearch_core::chunking::SourceDocument;
use hopsearch_core::query::{IndexQuery, SearchRequest, TITLE_FIELD};
use hopsearch_core::scan::{ScanCursor, ScanPage};
use hopsearch_core::schema::{IndexSchema, Similarity};
use hopsearch_core::similarity::cosine_similarity;
use hopsearch_core::traits::{Embedder, IndexEngine};
use hopsearch_core::types::{Chunk, SearchHit, Triple};
use hopsearch_core::{Error, Result};
use hopsearch_embed::HashEmbedder;
use hopsearch_hybrid::{IndexBuilder, TriplePreprocessor};

pub const DIM: usize = 256;

struct MemIndex {
    schema: IndexSchema,
    chunks: Vec<Chunk>,
}

/// In-memory engine: cosine kNN over stored embeddings and a token-overlap
/// stand-in for BM25. Every search request is recorded.
#[derive(Default)]
pub struct MemoryEngine {
    indexes: Mutex<HashMap<String, MemIndex>>,
    pub requests: Mutex<Vec<SearchRequest>>,
    pub bulk_sizes: Mutex<Vec<usize>>,
    pub fail_knn: AtomicBool,
}

impl MemoryEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stored(&self, index: &str) -> Vec<Chunk> {
        self.indexes.lock().unwrap().get(index).map(|i| i.chunks.clone()).unwrap_or_default()
    }

    pub fn recorded(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn bulk_calls(&self) -> Vec<usize> {
        self.bulk_sizes.lock().unwrap().clone()
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn strip(chunk: &Chunk) -> Chunk {
    Chunk::new(chunk.id.clone(), chunk.text.clone(), chunk.metadata.clone())
}

fn passes(filters: &[Value], chunk: &Chunk) -> bool {
    let metadata = serde_json::to_value(&chunk.metadata).unwrap();
    filters.iter().all(|f| {
        let Some(term) = f.get("term").and_then(Value::as_object) else {
            return false;
        };
        term.iter().all(|(k, v)| {
            let field = k.trim_start_matches("metadata.");
            metadata.get(field) == Some(v)
        })
    })
}

/// Token-overlap score of a lexical query; `None` when nothing matches.
fn lexical_score(query: &IndexQuery, chunk: &Chunk, filters: &mut Vec<Value>) -> Option<f32> {
    match query {
        IndexQuery::MatchAll => Some(1.0),
        IndexQuery::Match { field, text } => {
            let target = if field == TITLE_FIELD { &chunk.metadata.title } else { &chunk.text };
            let doc = tokens(target);
            let n = tokens(text).iter().filter(|t| doc.contains(*t)).count();
            (n > 0).then_some(n as f32)
        }
        IndexQuery::Bool(b) => {
            filters.extend(b.filter.iter().cloned());
            let mut total = 0.0;
            for q in &b.must {
                total += lexical_score(q, chunk, filters)?;
            }
            let mut any_should = b.should.is_empty();
            for q in &b.should {
                if let Some(s) = lexical_score(q, chunk, filters) {
                    total += s;
                    any_should = true;
                }
            }
            if !any_should && b.must.is_empty() {
                return None;
            }
            Some(total)
        }
        IndexQuery::Knn { .. } => None,
    }
}

#[async_trait]
impl IndexEngine for MemoryEngine {
    fn base_uri(&self) -> String {
        "mem://test".to_string()
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.indexes.lock().unwrap().contains_key(index))
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        let mut indexes = self.indexes.lock().unwrap();
        if indexes.contains_key(index) {
            return Err(Error::IndexAlreadyExists(index.to_string()));
        }
        indexes.insert(
            index.to_string(),
            MemIndex {
                schema: schema.clone(),
                chunks: Vec::new(),
            },
        );
        Ok(())
    }

    async fn bulk_write(&self, index: &str, chunks: &[Chunk]) -> Result<usize> {
        let mut indexes = self.indexes.lock().unwrap();
        let idx = indexes
            .get_mut(index)
            .ok_or_else(|| Error::Operation(format!("no index {index}")))?;
        for c in chunks {
            let dims = c.embedding().map(<[f32]>::len).unwrap_or(0);
            if dims != idx.schema.vector_field.dims {
                return Err(Error::DimensionMismatch {
                    expected: idx.schema.vector_field.dims,
                    actual: dims,
                });
            }
        }
        idx.chunks.extend(chunks.iter().cloned());
        self.bulk_sizes.lock().unwrap().push(chunks.len());
        Ok(chunks.len())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.requests.lock().unwrap().push(request.clone());
        let indexes = self.indexes.lock().unwrap();
        let idx = indexes
            .get(index)
            .ok_or_else(|| Error::Operation(format!("no index {index}")))?;
        let mut hits: Vec<SearchHit> = Vec::new();
        let limit;
        match &request.query {
            IndexQuery::Knn { vector, k, filter, .. } => {
                if self.fail_knn.load(Ordering::SeqCst) {
                    return Err(Error::Transient("knn unavailable".into()));
                }
                limit = (*k).min(request.size);
                let filters: Vec<Value> = filter.iter().cloned().collect();
                for c in &idx.chunks {
                    if passes(&filters, c) {
                        let score = cosine_similarity(vector, c.embedding().unwrap_or(&[]));
                        hits.push(SearchHit { chunk: strip(c), score });
                    }
                }
            }
            query => {
                limit = request.size;
                for c in &idx.chunks {
                    let mut filters = Vec::new();
                    if let Some(score) = lexical_score(query, c, &mut filters) {
                        if passes(&filters, c) {
                            hits.push(SearchHit { chunk: strip(c), score });
                        }
                    }
                }
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Chunk>> {
        let indexes = self.indexes.lock().unwrap();
        Ok(indexes
            .get(index)
            .and_then(|i| i.chunks.iter().find(|c| c.id == id))
            .map(strip))
    }

    async fn scan(&self, index: &str, page_size: usize, after: Option<&ScanCursor>) -> Result<ScanPage> {
        let indexes = self.indexes.lock().unwrap();
        let idx = indexes
            .get(index)
            .ok_or_else(|| Error::Operation(format!("no index {index}")))?;
        let start = after
            .and_then(|c| c.0.first())
            .and_then(Value::as_u64)
            .map_or(0, |p| p as usize + 1);
        let hits: Vec<Chunk> = idx.chunks.iter().skip(start).take(page_size).map(strip).collect();
        let cursor = (!hits.is_empty()).then(|| ScanCursor(vec![Value::from((start + hits.len() - 1) as u64)]));
        Ok(ScanPage { hits, cursor })
    }

    async fn count(&self, index: &str) -> Result<usize> {
        Ok(self.indexes.lock().unwrap().get(index).map_or(0, |i| i.chunks.len()))
    }
}

pub fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashEmbedder::new(DIM))
}

pub fn corpus() -> Vec<SourceDocument> {
    vec![
        SourceDocument::new("fire.txt", "Firecraft", "Building a fire needs tinder, kindling and dry fuel wood."),
        SourceDocument::new("water.txt", "Water", "Boil water for one minute to make it safe to drink."),
        SourceDocument::new("shelter.txt", "Shelter", "A lean-to shelter keeps rain off. Add a reflector wall near the fire."),
        SourceDocument::new("knots.txt", "Knots", "The bowline forms a fixed loop at the end of a rope."),
    ]
}

pub fn chunk_schema() -> IndexSchema {
    IndexSchema::for_chunks(DIM, Similarity::Cosine, None)
}

pub fn triple(elements: &[&str], chunk_id: &str) -> Triple {
    Triple::new(elements.iter().map(|s| s.to_string()).collect(), chunk_id).unwrap()
}

/// Writes `triples` into a fresh triple index named `index`.
pub async fn triple_index(engine: Arc<MemoryEngine>, index: &str, triples: Vec<Triple>) {
    IndexBuilder::new(engine, embedder())
        .build_index(index, &IndexSchema::for_triples(DIM, Similarity::Cosine), triples, &TriplePreprocessor)
        .await
        .unwrap();
}
