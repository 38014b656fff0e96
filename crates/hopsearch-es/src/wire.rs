//! Request and response bodies of the Elasticsearch REST API.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use hopsearch_core::scan::ScanCursor;
use hopsearch_core::schema::{IndexSchema, DEFAULT_TEXT_FIELD, DEFAULT_VECTOR_FIELD};
use hopsearch_core::types::{Chunk, ChunkMetadata, SearchHit};
use hopsearch_core::{Error, Result};

/// Field names used when reading and writing documents of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocFields {
    pub text: String,
    pub vector: String,
}

impl Default for DocFields {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_FIELD.to_string(),
            vector: DEFAULT_VECTOR_FIELD.to_string(),
        }
    }
}

impl From<&IndexSchema> for DocFields {
    fn from(schema: &IndexSchema) -> Self {
        Self {
            text: schema.text_field.name.clone(),
            vector: schema.vector_field.name.clone(),
        }
    }
}

pub fn create_index_body(schema: &IndexSchema) -> Value {
    json!({ "mappings": schema.to_mapping() })
}

/// NDJSON body of a `_bulk` request indexing every chunk.
pub fn bulk_body(index: &str, chunks: &[Chunk], fields: &DocFields) -> Result<String> {
    let mut body = String::new();
    for chunk in chunks {
        let embedding = chunk
            .embedding()
            .ok_or_else(|| Error::Operation(format!("chunk '{}' has no embedding", chunk.id)))?;
        let action = json!({ "index": { "_index": index, "_id": chunk.id } });
        let mut source = Map::new();
        source.insert(fields.text.clone(), json!(chunk.text));
        source.insert("metadata".into(), serde_json::to_value(&chunk.metadata)?);
        source.insert(fields.vector.clone(), json!(embedding));
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&Value::Object(source))?);
        body.push('\n');
    }
    Ok(body)
}

pub fn scan_body(page_size: usize, after: Option<&ScanCursor>) -> Value {
    let mut body = json!({
        "query": { "match_all": {} },
        "size": page_size,
        "sort": ["_doc"],
        "track_total_hits": false,
    });
    if let Some(cursor) = after {
        body["search_after"] = Value::Array(cursor.0.clone());
    }
    body
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
pub struct HitsEnvelope {
    #[serde(default)]
    pub hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
pub struct RawHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f32>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
    #[serde(default)]
    pub sort: Option<Vec<Value>>,
}

impl RawHit {
    pub fn into_chunk(self, fields: &DocFields) -> Result<Chunk> {
        let text = self
            .source
            .get(&fields.text)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let metadata: ChunkMetadata = match self.source.get("metadata") {
            Some(m) => serde_json::from_value(m.clone())?,
            None => ChunkMetadata::default(),
        };
        Ok(Chunk::new(self.id, text, metadata))
    }

    pub fn into_search_hit(self, fields: &DocFields) -> Result<SearchHit> {
        let score = self.score.unwrap_or(0.0);
        Ok(SearchHit {
            chunk: self.into_chunk(fields)?,
            score,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct GetResponse {
    #[serde(default)]
    pub found: bool,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl GetResponse {
    pub fn into_chunk(self, fields: &DocFields) -> Result<Option<Chunk>> {
        if !self.found {
            return Ok(None);
        }
        let hit = RawHit {
            id: self.id,
            score: None,
            source: self.source,
            sort: None,
        };
        hit.into_chunk(fields).map(Some)
    }
}

#[derive(Debug, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<Map<String, Value>>,
}

impl BulkResponse {
    /// Reason of the first failed item, if any.
    pub fn first_error(&self) -> Option<String> {
        if !self.errors {
            return None;
        }
        self.items
            .iter()
            .flat_map(|item| item.values())
            .find_map(|op| op.get("error"))
            .map(|e| match e.get("reason").and_then(Value::as_str) {
                Some(reason) => reason.to_string(),
                None => e.to_string(),
            })
            .or_else(|| Some("bulk request reported errors".to_string()))
    }
}

/// `error.type` of an error response body.
pub fn error_type(body: &Value) -> Option<&str> {
    body.get("error")?.get("type")?.as_str()
}
