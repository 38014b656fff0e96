//! Index schema: one vector field, one text field and declared metadata.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Metadata keys owned by the index engine.
pub const RESERVED_METADATA_FIELDS: [&str; 3] = ["document_id", "doc_id", "ref_doc_id"];

pub const DEFAULT_VECTOR_FIELD: &str = "embedding";
pub const DEFAULT_TEXT_FIELD: &str = "content";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    #[default]
    Cosine,
    DotProduct,
    L2Norm,
}

impl FromStr for Similarity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Similarity::Cosine),
            "dot_product" => Ok(Similarity::DotProduct),
            "l2_norm" => Ok(Similarity::L2Norm),
            other => Err(Error::InvalidConfig(format!(
                "unknown similarity '{other}', expected cosine, dot_product or l2_norm"
            ))),
        }
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Similarity::Cosine => "cosine",
            Similarity::DotProduct => "dot_product",
            Similarity::L2Norm => "l2_norm",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorField {
    pub name: String,
    pub dims: usize,
    pub similarity: Similarity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextField {
    pub name: String,
    #[serde(default)]
    pub analyzer: Option<String>,
}

/// Mapping of a caller-declared metadata field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Keyword,
    Text {
        #[serde(default)]
        analyzer: Option<String>,
        #[serde(default = "indexed_by_default")]
        index: bool,
    },
    Integer,
}

fn indexed_by_default() -> bool {
    true
}

impl FieldKind {
    fn to_mapping(&self) -> Value {
        match self {
            FieldKind::Keyword => json!({ "type": "keyword" }),
            FieldKind::Integer => json!({ "type": "integer" }),
            FieldKind::Text { analyzer, index } => {
                let mut m = Map::new();
                m.insert("type".into(), json!("text"));
                if let Some(a) = analyzer {
                    m.insert("analyzer".into(), json!(a));
                }
                if !index {
                    m.insert("index".into(), json!(false));
                }
                Value::Object(m)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub vector_field: VectorField,
    pub text_field: TextField,
    #[serde(default)]
    pub metadata_fields: BTreeMap<String, FieldKind>,
}

impl IndexSchema {
    pub fn new(dims: usize, similarity: Similarity) -> Self {
        Self {
            vector_field: VectorField {
                name: DEFAULT_VECTOR_FIELD.to_string(),
                dims,
                similarity,
            },
            text_field: TextField {
                name: DEFAULT_TEXT_FIELD.to_string(),
                analyzer: None,
            },
            metadata_fields: BTreeMap::new(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Option<String>) -> Self {
        self.text_field.analyzer = analyzer;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.metadata_fields.insert(name.into(), kind);
        self
    }

    /// Schema of a passage index: title, source document and position.
    pub fn for_chunks(dims: usize, similarity: Similarity, analyzer: Option<String>) -> Self {
        Self::new(dims, similarity)
            .with_analyzer(analyzer.clone())
            .with_field(
                "title",
                FieldKind::Text {
                    analyzer,
                    index: true,
                },
            )
            .with_field("source_id", FieldKind::Keyword)
            .with_field("position", FieldKind::Integer)
    }

    /// Schema of a triple index: provenance chunk id and the stored tuple.
    pub fn for_triples(dims: usize, similarity: Similarity) -> Self {
        Self::new(dims, similarity)
            .with_field("chunk_id", FieldKind::Keyword)
            .with_field(
                "triple",
                FieldKind::Text {
                    analyzer: None,
                    index: false,
                },
            )
    }

    /// Rejects reserved metadata keys and degenerate vector settings.
    pub fn validate(&self) -> Result<()> {
        if let Some(field) = self
            .metadata_fields
            .keys()
            .find(|k| RESERVED_METADATA_FIELDS.contains(&k.as_str()))
        {
            return Err(Error::ReservedFieldConflict(field.clone()));
        }
        if self.vector_field.dims == 0 {
            return Err(Error::InvalidConfig("vector dimension must be positive".into()));
        }
        if self.vector_field.name.is_empty() || self.text_field.name.is_empty() {
            return Err(Error::InvalidConfig("field names must not be empty".into()));
        }
        if self.vector_field.name == self.text_field.name {
            return Err(Error::InvalidConfig(
                "vector and text fields must have different names".into(),
            ));
        }
        Ok(())
    }

    /// Engine mapping in Elasticsearch form.
    pub fn to_mapping(&self) -> Value {
        let mut metadata = Map::new();
        for reserved in RESERVED_METADATA_FIELDS {
            metadata.insert(reserved.to_string(), json!({ "type": "keyword" }));
        }
        // Reserved keys stay engine-owned even on an unvalidated schema.
        for (name, kind) in &self.metadata_fields {
            if !RESERVED_METADATA_FIELDS.contains(&name.as_str()) {
                metadata.insert(name.clone(), kind.to_mapping());
            }
        }

        let mut text = Map::new();
        text.insert("type".into(), json!("text"));
        if let Some(a) = &self.text_field.analyzer {
            text.insert("analyzer".into(), json!(a));
        }

        let mut properties = Map::new();
        properties.insert(
            self.vector_field.name.clone(),
            json!({
                "type": "dense_vector",
                "dims": self.vector_field.dims,
                "index": true,
                "similarity": self.vector_field.similarity.to_string(),
            }),
        );
        properties.insert(self.text_field.name.clone(), Value::Object(text));
        properties.insert("metadata".into(), json!({ "properties": metadata }));

        json!({ "properties": properties })
    }
}
