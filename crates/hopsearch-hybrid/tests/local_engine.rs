use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use hopsearch_core::chunking::{Chunker, SourceDocument};
use hopsearch_core::query::SearchRequest;
use hopsearch_core::scan::IndexScan;
use hopsearch_core::schema::{FieldKind, IndexSchema, Similarity};
use hopsearch_core::traits::{Embedder, IndexEngine};
use hopsearch_core::types::{Chunk, ChunkMetadata, QueryMode};
use hopsearch_core::Error;
use hopsearch_embed::HashEmbedder;
use hopsearch_hybrid::{ChunkPreprocessor, HybridRetriever, IndexBuilder, LocalEngine, RetrieverConfig};

const DIM: usize = 64;

fn docs() -> Vec<SourceDocument> {
    vec![
        SourceDocument::new("fire.txt", "Firecraft", "Building a fire needs tinder, kindling and dry fuel wood."),
        SourceDocument::new("water.txt", "Water", "Boil water for one minute to make it safe to drink."),
        SourceDocument::new("shelter.txt", "Shelter", "A lean-to shelter keeps rain off. Add a reflector wall near the fire."),
        SourceDocument::new("knots.txt", "Knots", "The bowline forms a fixed loop at the end of a rope."),
        SourceDocument::new("food.txt", "Food", "Smoke fish over a low fire to keep it for weeks."),
    ]
}

async fn built(root: &TempDir) -> Arc<LocalEngine> {
    let engine = Arc::new(LocalEngine::new(root.path()));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIM));
    let pre = ChunkPreprocessor::new(Chunker::whitespace(64, Some(0)).unwrap());
    let report = IndexBuilder::new(engine.clone(), embedder)
        .with_batch_size(2)
        .build_index("chunks", &IndexSchema::for_chunks(DIM, Similarity::Cosine, None), docs(), &pre)
        .await
        .unwrap();
    assert_eq!(report.chunks, 5);
    engine
}

#[tokio::test]
async fn build_then_query_both_branches() {
    let tmp = TempDir::new().unwrap();
    let engine = built(&tmp).await;
    assert!(engine.index_exists("chunks").await.unwrap());
    assert!(!engine.index_exists("other").await.unwrap());
    assert_eq!(engine.count("chunks").await.unwrap(), 5);
    assert!(engine.base_uri().starts_with("file://"));

    let retriever = HybridRetriever::new(engine.clone(), RetrieverConfig::new("chunks"))
        .with_embedder(Arc::new(HashEmbedder::new(DIM)));
    let lexical = retriever.retrieve("kindling tinder", 3, QueryMode::Lexical).await.unwrap();
    assert_eq!(lexical.get(0).unwrap().item.id, "fire.txt:0");
    assert_eq!(lexical.get(0).unwrap().item.metadata.title, "Firecraft");

    let dense = retriever.retrieve("boil water drink", 2, QueryMode::Dense).await.unwrap();
    assert_eq!(dense.len(), 2);
    assert_eq!(dense.get(0).unwrap().item.id, "water.txt:0");

    let hybrid = retriever.retrieve("fire", 3, QueryMode::Hybrid).await.unwrap();
    assert!(hybrid.len() <= 3 && !hybrid.is_empty());
}

#[tokio::test]
async fn second_creation_fails_and_reopen_works() {
    let tmp = TempDir::new().unwrap();
    let engine = built(&tmp).await;
    let err = engine
        .create_index("chunks", &IndexSchema::for_chunks(DIM, Similarity::Cosine, None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IndexAlreadyExists(_)));
    drop(engine);

    let reopened = LocalEngine::new(tmp.path());
    assert_eq!(reopened.count("chunks").await.unwrap(), 5);
    let chunk = reopened.get("chunks", "knots.txt:0").await.unwrap().unwrap();
    assert!(chunk.text.contains("bowline"));
    assert!(chunk.embedding().is_none());
    assert!(reopened.get("chunks", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn scan_visits_every_chunk_once() {
    let tmp = TempDir::new().unwrap();
    let engine = built(&tmp).await;
    let mut scan = IndexScan::new(engine.as_ref(), "chunks").with_page_size(2);
    let mut seen = Vec::new();
    while let Some(batch) = scan.next_batch().await.unwrap() {
        assert!(batch.len() <= 2);
        seen.extend(batch.into_iter().map(|c| c.id));
    }
    assert_eq!(seen, vec!["fire.txt:0", "water.txt:0", "shelter.txt:0", "knots.txt:0", "food.txt:0"]);
    assert!(scan.is_exhausted());
}

#[tokio::test]
async fn term_filters_apply_to_both_kinds() {
    let tmp = TempDir::new().unwrap();
    let engine = built(&tmp).await;
    let filter = json!({"term": {"metadata.source_id": "food.txt"}});

    let lexical = SearchRequest::lexical("content", "fire", 5, Some(filter.clone()));
    let hits = engine.search("chunks", &lexical).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, "food.txt:0");

    let vector = HashEmbedder::new(DIM).embed_one("fire").unwrap();
    let knn = SearchRequest::knn("embedding", vector, 3, 10, Some(filter));
    let hits = engine.search("chunks", &knn).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, "food.txt:0");

    let range = json!({"range": {"metadata.position": {"gte": 0}}});
    let err = engine
        .search("chunks", &SearchRequest::lexical("content", "fire", 5, Some(range)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[tokio::test]
async fn writes_and_queries_check_dimensions() {
    let tmp = TempDir::new().unwrap();
    let engine = built(&tmp).await;
    let wrong = Chunk::new("x", "text", ChunkMetadata::default()).with_embedding(vec![0.5; DIM + 1]).unwrap();
    let err = engine.bulk_write("chunks", &[wrong]).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: DIM, .. }));

    let knn = SearchRequest::knn("embedding", vec![1.0; 3], 3, 10, None);
    assert!(matches!(
        engine.search("chunks", &knn).await,
        Err(Error::DimensionMismatch { actual: 3, .. })
    ));
    assert_eq!(engine.count("chunks").await.unwrap(), 5);
}

#[tokio::test]
async fn index_names_must_be_plain() {
    let tmp = TempDir::new().unwrap();
    let engine = LocalEngine::new(tmp.path());
    assert!(matches!(engine.index_exists("../escape").await, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn create_rejects_reserved_metadata_without_touching_disk() {
    let tmp = TempDir::new().unwrap();
    let engine = LocalEngine::new(tmp.path());
    let schema = IndexSchema::new(DIM, Similarity::Cosine).with_field("ref_doc_id", FieldKind::Keyword);
    let err = engine.create_index("chunks", &schema).await.unwrap_err();
    assert!(matches!(err, Error::ReservedFieldConflict(ref f) if f == "ref_doc_id"));
    assert!(!engine.index_exists("chunks").await.unwrap());
    assert!(!tmp.path().join("chunks").exists());
}
