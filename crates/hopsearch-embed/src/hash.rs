use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use hopsearch_core::traits::Embedder;
use hopsearch_core::types::Embedding;
use hopsearch_core::similarity::l2_normalize;
use hopsearch_core::Result;

/// Deterministic bag-of-words embedder. Components are non-negative and the
/// vector has unit length (or is zero for text without words).
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            model_id: format!("hash-{dim}"),
        }
    }

    fn embed(&self, text: &str) -> Embedding {
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for (i, token) in tokens.enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_many(&self, texts: &[String], _batch_size: usize) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn known_dimension(&self) -> Option<usize> {
        Some(self.dim)
    }
}
