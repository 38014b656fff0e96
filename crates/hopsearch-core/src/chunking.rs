//! Token-window chunking with overlap.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;
use tracing::warn;

use crate::error::{Error, Result};
use crate::traits::{Tokenize, WhitespaceTokenizer};
use crate::types::{Chunk, ChunkMetadata, Meta};

pub const PARAGRAPH_SEPARATOR: char = '\n';

/// A raw document before chunking.
///
/// Metadata keys listed in `included_metadata` are rendered as `key: value`
/// lines and charged against the chunk window. Every other key is excluded
/// from length accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_id: String,
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Meta,
    #[serde(default)]
    pub included_metadata: Vec<String>,
}

impl SourceDocument {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn counting_metadata(mut self, key: impl Into<String>) -> Self {
        self.included_metadata.push(key.into());
        self
    }

    fn metadata_header(&self) -> String {
        self.included_metadata
            .iter()
            .filter_map(|k| {
                self.metadata.get(k).map(|v| match v {
                    Value::String(s) => format!("{k}: {s}"),
                    other => format!("{k}: {other}"),
                })
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct Chunker<T: Tokenize = WhitespaceTokenizer> {
    tokenizer: T,
    chunk_size: usize,
    overlap: usize,
}

impl Chunker<WhitespaceTokenizer> {
    pub fn whitespace(chunk_size: usize, overlap: Option<usize>) -> Result<Self> {
        Self::new(WhitespaceTokenizer, chunk_size, overlap)
    }
}

impl<T: Tokenize> Chunker<T> {
    /// `overlap` defaults to a fifth of the chunk size. The chunk size is
    /// capped at the tokenizer's maximum input length.
    pub fn new(tokenizer: T, chunk_size: usize, overlap: Option<usize>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive".into()));
        }
        let chunk_size = match tokenizer.max_tokens() {
            Some(max) if max < chunk_size => {
                warn!(requested = chunk_size, max, "chunk size capped at tokenizer maximum");
                max
            }
            _ => chunk_size,
        };
        let overlap = overlap.unwrap_or(chunk_size / 5);
        if overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            tokenizer,
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn split(&self, doc: &SourceDocument) -> Result<Vec<Chunk>> {
        let header = doc.metadata_header();
        let header_tokens = if header.is_empty() {
            0
        } else {
            self.tokenizer.token_spans(&header)?.len()
        };
        let window = self.chunk_size.saturating_sub(header_tokens);
        if window <= self.overlap {
            return Err(Error::InvalidConfig(format!(
                "metadata of '{}' takes {header_tokens} tokens, leaving no room in a {}-token chunk",
                doc.source_id, self.chunk_size
            )));
        }

        let spans = self.tokenizer.token_spans(&doc.text)?;
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < spans.len() {
            let mut end = (start + window).min(spans.len());
            if end < spans.len() {
                end = self.paragraph_cut(&doc.text, &spans, start, end);
            }
            let text = &doc.text[spans[start].start..spans[end - 1].end];
            chunks.push(Chunk::new(
                format!("{}:{}", doc.source_id, chunks.len()),
                text,
                ChunkMetadata {
                    title: doc.title.clone(),
                    source_id: doc.source_id.clone(),
                    position: chunks.len(),
                    extra: doc.metadata.clone(),
                },
            ));
            if end == spans.len() {
                break;
            }
            start = (end - self.overlap).max(start + 1);
        }
        Ok(chunks)
    }

    /// Moves a window end back to the last paragraph break in its second
    /// half, if there is one.
    fn paragraph_cut(&self, text: &str, spans: &[Range<usize>], start: usize, end: usize) -> usize {
        let earliest = start + ((end - start) / 2).max(self.overlap + 1);
        (earliest..end)
            .rev()
            .find(|&j| text[spans[j - 1].end..spans[j].start].contains(PARAGRAPH_SEPARATOR))
            .unwrap_or(end)
    }
}
