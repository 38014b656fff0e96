//! Embedding models.
//!
//! `CachedEmbedder` runs an XLM-RoBERTa sentence encoder through the
//! process-wide [`ModelCache`]; `HashEmbedder` is a deterministic stand-in for
//! tests and offline runs.

pub mod cache;
pub mod device;
pub mod hash;
pub mod model;
pub mod pool;
pub mod tokenize;

use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use hopsearch_core::config::{expand_path, EmbeddingSettings};
use hopsearch_core::traits::Embedder;
use hopsearch_core::types::Embedding;
use hopsearch_core::{Error, Result};

pub use cache::ModelCache;
pub use hash::HashEmbedder;
pub use model::SentenceEmbedder;
pub use pool::masked_mean_l2;
pub use tokenize::HfTokenCounter;

static MODEL_CACHE: OnceLock<ModelCache<SentenceEmbedder>> = OnceLock::new();

/// The shared model cache. The capacity of the first call wins.
pub fn model_cache(capacity: u64) -> &'static ModelCache<SentenceEmbedder> {
    MODEL_CACHE.get_or_init(|| ModelCache::new(capacity))
}

/// Sentence encoder resolved through the model cache on every call, so an
/// evicted model is reloaded transparently.
pub struct CachedEmbedder {
    model_dir: PathBuf,
    model_id: String,
    max_len: usize,
    cache: &'static ModelCache<SentenceEmbedder>,
}

impl CachedEmbedder {
    pub fn new(model_dir: impl Into<PathBuf>, max_len: usize, cache_capacity: u64) -> Self {
        let model_dir = model_dir.into();
        Self {
            model_id: model_dir.to_string_lossy().to_string(),
            model_dir,
            max_len,
            cache: model_cache(cache_capacity),
        }
    }

    fn model(&self) -> Result<Arc<SentenceEmbedder>> {
        self.cache
            .get_or_load(&self.model_id, || SentenceEmbedder::load(&self.model_dir, self.max_len))
            .map_err(|e| Error::ModelUnavailable(format!("{}: {e:#}", self.model_id)))
    }
}

impl Embedder for CachedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_many(&self, texts: &[String], batch_size: usize) -> Result<Vec<Embedding>> {
        let model = self.model()?;
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            let vectors = model
                .encode(batch)
                .map_err(|e| Error::Operation(format!("embedding failed: {e:#}")))?;
            out.extend(vectors);
        }
        Ok(out)
    }

    fn dimension(&self) -> Result<usize> {
        Ok(self.model()?.dim())
    }
}

/// Whether the hash embedder stands in for the model, either by setting or
/// through `APP_USE_FAKE_EMBEDDINGS=1`.
pub fn use_fake_embeddings(settings: &EmbeddingSettings) -> bool {
    settings.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

/// Picks the embedder described by the settings.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> anyhow::Result<Arc<dyn Embedder>> {
    if use_fake_embeddings(settings) {
        info!(dim = settings.fake_dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.fake_dim)));
    }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Arc::new(CachedEmbedder::new(
        model_dir,
        settings.max_len,
        settings.cache_capacity,
    )))
}

/// Configured directory first, then `APP_MODEL_DIR`, `MODEL_DIR` and the
/// conventional `models/bge-m3` locations.
pub fn resolve_model_dir(configured: Option<&str>) -> anyhow::Result<PathBuf> {
    let candidates = configured
        .map(String::from)
        .into_iter()
        .chain(std::env::var("APP_MODEL_DIR").ok())
        .chain(std::env::var("MODEL_DIR").ok())
        .map(expand_path)
        .chain([
            Path::new("../models/bge-m3").to_path_buf(),
            Path::new("models/bge-m3").to_path_buf(),
        ]);
    for dir in candidates {
        if dir.exists() {
            info!(dir = %dir.display(), "using model dir");
            return Ok(dir);
        }
        debug!(dir = %dir.display(), "model dir not found");
    }
    Err(anyhow!("Could not locate an embedding model directory"))
}
