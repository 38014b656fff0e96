//! Domain types shared by the indexer, the engines and the retrievers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type Embedding = Vec<f32>;
pub type Meta = Map<String, Value>;

/// Metadata stored next to every chunk.
///
/// `extra` holds caller-declared fields (for example `chunk_id` and `triple`
/// on triple documents). It is flattened into the same JSON object, so the
/// engine sees a single `metadata` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub position: usize,
    #[serde(flatten)]
    pub extra: Meta,
}

/// A bounded span of a source document, the unit of indexing and retrieval.
///
/// The embedding can be attached once; afterwards it is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Embedding>,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
            embedding: None,
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn set_embedding(&mut self, embedding: Embedding) -> Result<()> {
        if self.embedding.is_some() {
            return Err(Error::Operation(format!(
                "embedding of chunk '{}' is already set",
                self.id
            )));
        }
        self.embedding = Some(embedding);
        Ok(())
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Result<Self> {
        self.set_embedding(embedding)?;
        Ok(self)
    }
}

/// A subject-relation(-object) fact with the id of the chunk it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    elements: Vec<String>,
    chunk_id: ChunkId,
}

impl Triple {
    pub fn new(elements: Vec<String>, chunk_id: impl Into<ChunkId>) -> Result<Self> {
        if !(2..=3).contains(&elements.len()) {
            return Err(Error::InvalidConfig(format!(
                "a triple has 2 or 3 elements, got {}",
                elements.len()
            )));
        }
        Ok(Self {
            elements,
            chunk_id: chunk_id.into(),
        })
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    pub fn first(&self) -> &str {
        &self.elements[0]
    }

    pub fn last(&self) -> &str {
        &self.elements[self.elements.len() - 1]
    }

    /// `{first, last}` without duplicates, first element first.
    pub fn entities(&self) -> Vec<&str> {
        let mut entities = vec![self.first()];
        if self.last() != self.first() {
            entities.push(self.last());
        }
        entities
    }

    pub fn shares_entity_with(&self, other: &Triple) -> bool {
        let theirs = other.entities();
        self.entities().iter().any(|e| theirs.contains(e))
    }

    /// Text written to the index: elements joined by a space.
    pub fn surface_text(&self) -> String {
        self.elements.join(" ")
    }

    /// Tuple rendering used when a triple is embedded as a statement,
    /// e.g. `('Paris', 'capital_of', 'France')`.
    pub fn statement(&self) -> String {
        let parts: Vec<String> = self.elements.iter().map(|e| quote(e)).collect();
        format!("({})", parts.join(", "))
    }

    /// Triple document as stored in a triple index.
    pub fn to_chunk(&self, position: usize) -> Chunk {
        let mut extra = Meta::new();
        extra.insert("chunk_id".into(), Value::String(self.chunk_id.clone()));
        extra.insert(
            "triple".into(),
            Value::Array(self.elements.iter().cloned().map(Value::String).collect()),
        );
        Chunk::new(
            format!("{}#{}", self.chunk_id, position),
            self.surface_text(),
            ChunkMetadata {
                title: String::new(),
                source_id: self.chunk_id.clone(),
                position,
                extra,
            },
        )
    }

    pub fn from_chunk(chunk: &Chunk) -> Result<Self> {
        let elements = chunk
            .metadata
            .extra
            .get("triple")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::Operation(format!("chunk '{}' carries no triple metadata", chunk.id))
            })?
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let chunk_id = chunk
            .metadata
            .extra
            .get("chunk_id")
            .and_then(Value::as_str)
            .unwrap_or(&chunk.metadata.source_id);
        Triple::new(elements, chunk_id)
    }
}

/// Quotes an element the way a Python string repr does: single quotes unless
/// the text holds a single quote and no double quote.
fn quote(s: &str) -> String {
    let delim = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delim);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let code = c as u32;
                let escaped = if code <= 0xff {
                    format!("\\x{code:02x}")
                } else if code <= 0xffff {
                    format!("\\u{code:04x}")
                } else {
                    format!("\\U{code:08x}")
                };
                out.push_str(&escaped);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

/// Which retrieval branch produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dense,
    Lexical,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Dense => f.write_str("dense"),
            SourceKind::Lexical => f.write_str("lexical"),
        }
    }
}

/// One hit returned by an index engine. Higher scores are better; scales
/// differ between query kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Dense,
    Lexical,
    Hybrid,
}

impl FromStr for QueryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" | "default" | "vector" => Ok(QueryMode::Dense),
            "lexical" | "text_search" | "bm25" => Ok(QueryMode::Lexical),
            "hybrid" => Ok(QueryMode::Hybrid),
            other => Err(Error::UnsupportedMode(other.to_string())),
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Dense => f.write_str("dense"),
            QueryMode::Lexical => f.write_str("lexical"),
            QueryMode::Hybrid => f.write_str("hybrid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    pub top_k: usize,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub filter: Option<Value>,
}

impl Query {
    pub fn new(text: impl Into<String>, top_k: usize, mode: QueryMode) -> Self {
        Self {
            text: text.into(),
            embedding: None,
            top_k,
            mode,
            filter: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Anything that can appear in a `RankedList`.
pub trait Identified {
    fn identity(&self) -> &str;
}

impl Identified for Chunk {
    fn identity(&self) -> &str {
        &self.id
    }
}

impl Identified for String {
    fn identity(&self) -> &str {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

/// Best-first list of scored items with unique identities.
///
/// `sources` names the retrieval branches that ran to produce the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList<T> {
    entries: Vec<Scored<T>>,
    sources: Vec<SourceKind>,
}

impl<T> Default for RankedList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl<T: Identified> RankedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from best-first pairs, keeping the first occurrence of
    /// each identity.
    pub fn from_scored<I>(items: I, sources: Vec<SourceKind>) -> Self
    where
        I: IntoIterator<Item = (T, f32)>,
    {
        let mut list = Self {
            entries: Vec::new(),
            sources,
        };
        for (item, score) in items {
            list.push(item, score);
        }
        list
    }

    /// Appends at the lowest rank. Returns false when the identity is
    /// already present.
    pub fn push(&mut self, item: T, score: f32) -> bool {
        if self.contains(item.identity()) {
            return false;
        }
        self.entries.push(Scored { item, score });
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.item.identity() == identity)
    }

    pub fn identities(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.item.identity()).collect()
    }
}

impl<T> RankedList<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scored<T>> {
        self.entries.iter()
    }

    pub fn get(&self, rank: usize) -> Option<&Scored<T>> {
        self.entries.get(rank)
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub fn sources(&self) -> &[SourceKind] {
        &self.sources
    }

    pub fn into_entries(self) -> Vec<Scored<T>> {
        self.entries
    }

    pub fn into_items(self) -> Vec<T> {
        self.entries.into_iter().map(|e| e.item).collect()
    }
}

impl<'a, T> IntoIterator for &'a RankedList<T> {
    type Item = &'a Scored<T>;
    type IntoIter = std::slice::Iter<'a, Scored<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A searchable collection as exposed to external callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub url: String,
    pub chunks: Vec<TextChunk>,
    #[serde(default)]
    pub metadata: Meta,
}

/// Output contract handed to the calling workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub datasets: Vec<Dataset>,
    pub documents: Vec<Document>,
}
