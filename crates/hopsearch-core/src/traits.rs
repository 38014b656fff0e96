use async_trait::async_trait;
use std::ops::Range;

use crate::error::{Error, Result};
use crate::query::SearchRequest;
use crate::scan::{ScanCursor, ScanPage};
use crate::schema::IndexSchema;
use crate::types::{Chunk, Embedding, SearchHit};

/// Text to fixed-dimension vectors. Output order always matches input order.
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model, used as the cache key.
    fn model_id(&self) -> &str;

    fn embed_many(&self, texts: &[String], batch_size: usize) -> Result<Vec<Embedding>>;

    fn embed_one(&self, text: &str) -> Result<Embedding> {
        self.embed_many(&[text.to_string()], 1)?
            .pop()
            .ok_or_else(|| Error::Operation("embedder returned no vector".into()))
    }

    /// Dimension when known without running the model.
    fn known_dimension(&self) -> Option<usize> {
        None
    }

    fn dimension(&self) -> Result<usize> {
        match self.known_dimension() {
            Some(d) => Ok(d),
            None => Ok(self.embed_one("X")?.len()),
        }
    }
}

/// Splits text into tokens, reported as byte ranges into the input.
pub trait Tokenize: Send + Sync {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>>;

    /// Longest input the model behind this tokenizer accepts.
    fn max_tokens(&self) -> Option<usize> {
        None
    }
}

/// Whitespace-delimited words as tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenize for WhitespaceTokenizer {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let mut spans = Vec::new();
        let mut start = None;
        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    spans.push(s..i);
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push(s..text.len());
        }
        Ok(spans)
    }
}

/// A search engine holding named indexes of chunks.
///
/// Implementations are shared between concurrent queries and the indexer;
/// conflicting writes are serialized by the engine itself.
#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// Base location used to build dataset and document URIs.
    fn base_uri(&self) -> String;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Fails with `IndexAlreadyExists` when the index is present.
    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()>;

    /// Writes embedded chunks. Returns the number written.
    async fn bulk_write(&self, index: &str, chunks: &[Chunk]) -> Result<usize>;

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>>;

    /// Chunk by id without its embedding. A missing chunk is `None`.
    async fn get(&self, index: &str, id: &str) -> Result<Option<Chunk>>;

    /// One page of every document in a stable order, starting after `after`.
    async fn scan(&self, index: &str, page_size: usize, after: Option<&ScanCursor>) -> Result<ScanPage>;

    async fn count(&self, index: &str) -> Result<usize>;
}
