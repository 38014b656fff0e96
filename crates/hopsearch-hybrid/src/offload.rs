use std::sync::Arc;

use hopsearch_core::traits::Embedder;
use hopsearch_core::types::Embedding;
use hopsearch_core::{Error, Result};

/// Runs the embedder on the blocking pool so a long forward pass does not
/// stall other tasks (the lexical branch of a hybrid search in particular).
pub(crate) async fn embed_many(embedder: &Arc<dyn Embedder>, texts: Vec<String>, batch_size: usize) -> Result<Vec<Embedding>> {
    let embedder = Arc::clone(embedder);
    let expected = texts.len();
    let vectors = tokio::task::spawn_blocking(move || embedder.embed_many(&texts, batch_size))
        .await
        .map_err(|e| Error::Operation(format!("embedding task failed: {e}")))??;
    if vectors.len() != expected {
        return Err(Error::Operation(format!(
            "embedder returned {} vectors for {expected} texts",
            vectors.len()
        )));
    }
    Ok(vectors)
}

pub(crate) async fn embed_one(embedder: &Arc<dyn Embedder>, text: &str) -> Result<Embedding> {
    let mut vectors = embed_many(embedder, vec![text.to_string()], 1).await?;
    vectors
        .pop()
        .ok_or_else(|| Error::Operation("embedder returned no vector".into()))
}
