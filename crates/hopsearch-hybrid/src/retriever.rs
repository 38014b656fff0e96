//! Dense, lexical and fused retrieval against one index.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use hopsearch_core::config::RetrievalSettings;
use hopsearch_core::query::{QueryRewrite, SearchRequest, TitleMatch};
use hopsearch_core::schema::{DEFAULT_TEXT_FIELD, DEFAULT_VECTOR_FIELD};
use hopsearch_core::traits::{Embedder, IndexEngine};
use hopsearch_core::types::{
    Chunk, Dataset, Document, Query, QueryMode, RankedList, RetrievalResult, SourceKind, TextChunk,
};
use hopsearch_core::{Error, Result};

use crate::fusion::{fuse_ranked, RrfConfig};
use crate::offload;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    pub index: String,
    pub text_field: String,
    pub vector_field: String,
    pub default_mode: QueryMode,
    pub default_top_k: usize,
    pub knn_num_candidates: usize,
    pub rrf: RrfConfig,
    /// Adds a title match to lexical requests when no custom rewrite is set.
    pub title_aware: bool,
}

impl RetrieverConfig {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            vector_field: DEFAULT_VECTOR_FIELD.to_string(),
            default_mode: QueryMode::Dense,
            default_top_k: 5,
            knn_num_candidates: 100,
            rrf: RrfConfig::default(),
            title_aware: false,
        }
    }

    pub fn from_settings(settings: &RetrievalSettings) -> Result<Self> {
        Ok(Self {
            default_mode: settings.mode.parse()?,
            default_top_k: settings.top_k,
            knn_num_candidates: settings.knn_num_candidates,
            rrf: RrfConfig::new(settings.rrf_k)?,
            title_aware: settings.title_aware,
            ..Self::new(settings.index.clone())
        })
    }
}

pub struct HybridRetriever {
    engine: Arc<dyn IndexEngine>,
    embedder: Option<Arc<dyn Embedder>>,
    rewrite: Option<Arc<dyn QueryRewrite>>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(engine: Arc<dyn IndexEngine>, config: RetrieverConfig) -> Self {
        Self {
            engine,
            embedder: None,
            rewrite: None,
            config,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Hook applied to every index request before it runs. Replaces the
    /// title-aware rewrite.
    pub fn with_rewrite(mut self, rewrite: Arc<dyn QueryRewrite>) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn IndexEngine> {
        &self.engine
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    /// Runs `text` with the given size and mode.
    pub async fn retrieve(&self, text: &str, top_k: usize, mode: QueryMode) -> Result<RankedList<Chunk>> {
        self.search(&Query::new(text, top_k, mode)).await
    }

    pub async fn search(&self, query: &Query) -> Result<RankedList<Chunk>> {
        debug!(index = %self.config.index, mode = %query.mode, top_k = query.top_k, "search");
        if query.top_k == 0 {
            return Ok(RankedList::from_scored(std::iter::empty(), vec![]));
        }
        match query.mode {
            QueryMode::Dense => self.dense(query).await,
            QueryMode::Lexical => self.lexical(query).await,
            QueryMode::Hybrid => self.hybrid(query).await,
        }
    }

    async fn dense(&self, query: &Query) -> Result<RankedList<Chunk>> {
        let vector = match (&query.embedding, &self.embedder) {
            (Some(v), _) => v.clone(),
            (None, Some(embedder)) => offload::embed_one(embedder, &query.text).await?,
            (None, None) => return Err(Error::EmbeddingRequired),
        };
        let request = SearchRequest::knn(
            &self.config.vector_field,
            vector,
            query.top_k,
            self.config.knn_num_candidates,
            query.filter.clone(),
        );
        self.run(request, &query.text, SourceKind::Dense).await
    }

    async fn lexical(&self, query: &Query) -> Result<RankedList<Chunk>> {
        let request = SearchRequest::lexical(&self.config.text_field, &query.text, query.top_k, query.filter.clone());
        self.run(request, &query.text, SourceKind::Lexical).await
    }

    /// Both branches run concurrently and are fused once both are done, so
    /// the result does not depend on which finishes first. A branch that
    /// found nothing is left out of `sources`.
    async fn hybrid(&self, query: &Query) -> Result<RankedList<Chunk>> {
        let (dense, lexical) = futures::try_join!(self.dense(query), self.lexical(query))?;
        // `sources` of the fused list names only the branches that contributed.
        let mut branches = Vec::with_capacity(2);
        for branch in [dense, lexical] {
            if branch.is_empty() {
                let kind = if branch.sources().contains(&SourceKind::Dense) { "dense" } else { "lexical" };
                warn!(index = %self.config.index, branch = kind, "branch returned nothing, result is one-sided");
            } else {
                branches.push(branch);
            }
        }
        let mut fused = fuse_ranked(branches, None, self.config.rrf)?;
        fused.truncate(query.top_k);
        Ok(fused)
    }

    async fn run(&self, request: SearchRequest, text: &str, kind: SourceKind) -> Result<RankedList<Chunk>> {
        let request = self.rewrite(request, text)?;
        let hits = self.engine.search(&self.config.index, &request).await?;
        debug!(branch = %kind, hits = hits.len(), "branch done");
        Ok(RankedList::from_scored(
            hits.into_iter().map(|h| (h.chunk, h.score)),
            vec![kind],
        ))
    }

    fn rewrite(&self, request: SearchRequest, text: &str) -> Result<SearchRequest> {
        let kind = request.kind();
        let rewritten = match (&self.rewrite, kind) {
            (Some(hook), _) => hook.rewrite(request, text),
            (None, SourceKind::Lexical) if self.config.title_aware => TitleMatch.rewrite(request, text),
            (None, _) => request,
        };
        if rewritten.kind() != kind {
            return Err(Error::InvalidConfig(format!(
                "query rewrite turned a {kind} request into a {} request",
                rewritten.kind()
            )));
        }
        Ok(rewritten)
    }

    pub fn dataset(&self) -> Dataset {
        Dataset {
            title: self.config.index.clone(),
            uri: format!("{}/{}", self.engine.base_uri(), self.config.index),
        }
    }

    /// The served dataset if it matches the given name and id.
    pub fn list_datasets(&self, name: Option<&str>, dataset_id: Option<&str>) -> Vec<Dataset> {
        let dataset = self.dataset();
        let name_ok = name.map_or(true, |n| n.is_empty() || n == dataset.title);
        let id_ok = dataset_id.map_or(true, |id| id.is_empty() || id == dataset.title || id == dataset.uri);
        if name_ok && id_ok {
            vec![dataset]
        } else {
            vec![]
        }
    }

    /// The chunk with this id as a document. Not found is an empty list.
    pub async fn list_documents(&self, document_id: &str) -> Result<Vec<Document>> {
        let Some(chunk) = self.engine.get(&self.config.index, document_id).await? else {
            debug!(document_id, "document not found");
            return Ok(vec![]);
        };
        Ok(vec![self.document(chunk, 1.0)?])
    }

    /// Retrieves with the configured default mode. If `datasets` is not
    /// empty and does not name this dataset, nothing is searched.
    pub async fn search_relevant_documents(&self, question: &str, datasets: &[Dataset], top_k: usize) -> Result<RetrievalResult> {
        let dataset = self.dataset();
        if !datasets.is_empty() && !datasets.contains(&dataset) {
            debug!(dataset = %dataset.title, "dataset filtered out");
            return Ok(RetrievalResult {
                query: question.to_string(),
                datasets: vec![],
                documents: vec![],
            });
        }
        let ranked = self.retrieve(question, top_k, self.config.default_mode).await?;
        let documents = ranked
            .into_entries()
            .into_iter()
            .map(|e| self.document(e.item, e.score))
            .collect::<Result<Vec<_>>>()?;
        Ok(RetrievalResult {
            query: question.to_string(),
            datasets: vec![dataset],
            documents,
        })
    }

    fn document(&self, chunk: Chunk, score: f32) -> Result<Document> {
        let metadata = match serde_json::to_value(&chunk.metadata)? {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        Ok(Document {
            url: format!("{}/_doc/{}", self.dataset().uri, chunk.id),
            title: chunk.metadata.title.clone(),
            document_id: chunk.id,
            chunks: vec![TextChunk {
                content: chunk.text,
                similarity_score: score,
            }],
            metadata,
        })
    }
}
