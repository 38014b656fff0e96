//! Typed index queries.
//!
//! Requests are built as values, may be edited by a [`QueryRewrite`] hook and
//! are finally rendered to the engine's query DSL by [`SearchRequest::to_body`].

use serde_json::{json, Map, Value};

use crate::types::SourceKind;

pub const TITLE_FIELD: &str = "metadata.title";

#[derive(Debug, Clone, PartialEq)]
pub enum IndexQuery {
    Knn {
        field: String,
        vector: Vec<f32>,
        k: usize,
        num_candidates: usize,
        filter: Option<Value>,
    },
    Match {
        field: String,
        text: String,
    },
    Bool(BoolQuery),
    MatchAll,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<IndexQuery>,
    pub should: Vec<IndexQuery>,
    pub filter: Vec<Value>,
}

impl IndexQuery {
    pub fn is_knn(&self) -> bool {
        matches!(self, IndexQuery::Knn { .. })
    }

    /// Retrieval branch this query belongs to.
    pub fn kind(&self) -> SourceKind {
        if self.is_knn() {
            SourceKind::Dense
        } else {
            SourceKind::Lexical
        }
    }

    fn to_dsl(&self) -> Value {
        match self {
            IndexQuery::Match { field, text } => json!({ "match": { field.clone(): { "query": text } } }),
            IndexQuery::MatchAll => json!({ "match_all": {} }),
            IndexQuery::Bool(b) => {
                let mut clauses = Map::new();
                if !b.must.is_empty() {
                    clauses.insert("must".into(), Value::Array(b.must.iter().map(Self::to_dsl).collect()));
                }
                if !b.should.is_empty() {
                    clauses.insert(
                        "should".into(),
                        Value::Array(b.should.iter().map(Self::to_dsl).collect()),
                    );
                }
                if !b.filter.is_empty() {
                    clauses.insert("filter".into(), Value::Array(b.filter.clone()));
                }
                json!({ "bool": clauses })
            }
            IndexQuery::Knn { .. } => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: IndexQuery,
    pub size: usize,
}

impl SearchRequest {
    pub fn knn(field: &str, vector: Vec<f32>, k: usize, num_candidates: usize, filter: Option<Value>) -> Self {
        Self {
            query: IndexQuery::Knn {
                field: field.to_string(),
                vector,
                k,
                num_candidates: num_candidates.max(k),
                filter,
            },
            size: k,
        }
    }

    /// BM25 match on the text field, wrapped in a bool query so filters and
    /// rewrites have somewhere to go.
    pub fn lexical(field: &str, text: &str, size: usize, filter: Option<Value>) -> Self {
        Self {
            query: IndexQuery::Bool(BoolQuery {
                must: vec![IndexQuery::Match {
                    field: field.to_string(),
                    text: text.to_string(),
                }],
                should: Vec::new(),
                filter: filter.into_iter().collect(),
            }),
            size,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.query.kind()
    }

    /// Request body in Elasticsearch query DSL.
    pub fn to_body(&self) -> Value {
        match &self.query {
            IndexQuery::Knn {
                field,
                vector,
                k,
                num_candidates,
                filter,
            } => {
                let mut knn = Map::new();
                knn.insert("field".into(), json!(field));
                knn.insert("query_vector".into(), json!(vector));
                knn.insert("k".into(), json!(k));
                knn.insert("num_candidates".into(), json!(num_candidates));
                if let Some(f) = filter {
                    knn.insert("filter".into(), f.clone());
                }
                json!({ "knn": knn, "size": self.size })
            }
            other => json!({ "query": other.to_dsl(), "size": self.size }),
        }
    }
}

/// Hook that edits an index request before it runs.
///
/// It receives every request the retriever issues along with the raw query
/// text. Changing the kind of request (kNN versus lexical) is rejected by the
/// retriever.
pub trait QueryRewrite: Send + Sync {
    fn rewrite(&self, request: SearchRequest, query_text: &str) -> SearchRequest;
}

impl<F> QueryRewrite for F
where
    F: Fn(SearchRequest, &str) -> SearchRequest + Send + Sync,
{
    fn rewrite(&self, request: SearchRequest, query_text: &str) -> SearchRequest {
        self(request, query_text)
    }
}

/// Turns the `must` clauses of a lexical request into `should` clauses and
/// adds a match on the document title, so a hit on either field counts.
#[derive(Debug, Clone, Default)]
pub struct TitleMatch;

impl QueryRewrite for TitleMatch {
    fn rewrite(&self, mut request: SearchRequest, query_text: &str) -> SearchRequest {
        if let IndexQuery::Bool(b) = &mut request.query {
            let must = std::mem::take(&mut b.must);
            b.should.extend(must);
            b.should.push(IndexQuery::Match {
                field: TITLE_FIELD.to_string(),
                text: query_text.to_string(),
            });
        }
        request
    }
}
