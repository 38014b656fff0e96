mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use hopsearch_core::chunking::Chunker;
use hopsearch_core::config::RetrievalSettings;
use hopsearch_core::query::{IndexQuery, QueryRewrite, SearchRequest, TITLE_FIELD};
use hopsearch_core::traits::Embedder;
use hopsearch_core::types::{Dataset, Query, QueryMode, SourceKind};
use hopsearch_core::Error;
use hopsearch_hybrid::{ChunkPreprocessor, HybridRetriever, IndexBuilder, RetrieverConfig};

use common::{chunk_schema, corpus, embedder, MemoryEngine};

async fn indexed() -> Arc<MemoryEngine> {
    let engine = MemoryEngine::new();
    let pre = ChunkPreprocessor::new(Chunker::whitespace(64, Some(0)).unwrap());
    IndexBuilder::new(engine.clone(), embedder())
        .build_index("chunks", &chunk_schema(), corpus(), &pre)
        .await
        .unwrap();
    engine
}

fn retriever(engine: &Arc<MemoryEngine>) -> HybridRetriever {
    HybridRetriever::new(engine.clone(), RetrieverConfig::new("chunks")).with_embedder(embedder())
}

#[tokio::test]
async fn lexical_ranks_keyword_matches() {
    let engine = indexed().await;
    let hits = retriever(&engine).retrieve("fire kindling", 5, QueryMode::Lexical).await.unwrap();
    assert_eq!(hits.identities(), vec!["fire.txt:0", "shelter.txt:0"]);
    assert_eq!(hits.sources(), &[SourceKind::Lexical]);
}

#[tokio::test]
async fn dense_embeds_the_query() {
    let engine = indexed().await;
    let hits = retriever(&engine)
        .retrieve("boil water safe to drink", 2, QueryMode::Dense)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits.get(0).unwrap().item.id, "water.txt:0");
    assert_eq!(hits.sources(), &[SourceKind::Dense]);
    let request = engine.recorded().pop().unwrap();
    match request.query {
        IndexQuery::Knn { k, num_candidates, .. } => {
            assert_eq!(k, 2);
            assert_eq!(num_candidates, 100);
        }
        other => panic!("expected knn, got {other:?}"),
    }
}

#[tokio::test]
async fn dense_without_embedding_or_embedder_fails() {
    let engine = indexed().await;
    let bare = HybridRetriever::new(engine.clone(), RetrieverConfig::new("chunks"));
    let err = bare.retrieve("water", 3, QueryMode::Dense).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingRequired));

    let vector = embedder().embed_one("water").unwrap();
    let hits = bare
        .search(&Query::new("water", 3, QueryMode::Dense).with_embedding(vector))
        .await
        .unwrap();
    assert_eq!(hits.get(0).unwrap().item.id, "water.txt:0");

    let lexical = bare.retrieve("water", 3, QueryMode::Lexical).await.unwrap();
    assert_eq!(lexical.len(), 1);
}

#[tokio::test]
async fn hybrid_fuses_both_branches() {
    let engine = indexed().await;
    let hits = retriever(&engine).retrieve("fire wall", 3, QueryMode::Hybrid).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits.sources(), &[SourceKind::Dense, SourceKind::Lexical]);
    let top: Vec<&str> = hits.identities().into_iter().take(2).collect();
    assert!(top.contains(&"shelter.txt:0"));
    assert!(top.contains(&"fire.txt:0"));
}

#[tokio::test]
async fn hybrid_with_an_empty_branch_keeps_the_other_order() {
    let engine = indexed().await;
    let r = retriever(&engine);
    let dense = r.retrieve("zzyzx qwerty", 4, QueryMode::Dense).await.unwrap();
    let lexical = r.retrieve("zzyzx qwerty", 4, QueryMode::Lexical).await.unwrap();
    assert!(lexical.is_empty());
    let hybrid = r.retrieve("zzyzx qwerty", 4, QueryMode::Hybrid).await.unwrap();
    assert_eq!(hybrid.identities(), dense.identities());
    assert_eq!(hybrid.sources(), &[SourceKind::Dense]);
}

#[tokio::test]
async fn hybrid_fails_when_a_branch_fails() {
    let engine = indexed().await;
    engine.fail_knn.store(true, Ordering::SeqCst);
    let err = retriever(&engine).retrieve("fire", 3, QueryMode::Hybrid).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn rewrite_may_not_change_the_mode() {
    let engine = indexed().await;
    let to_knn = |_req: SearchRequest, _text: &str| SearchRequest::knn("embedding", vec![0.0; common::DIM], 3, 10, None);
    let r = retriever(&engine).with_rewrite(Arc::new(to_knn));
    let err = r.retrieve("fire", 3, QueryMode::Lexical).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[tokio::test]
async fn title_aware_matches_titles() {
    let engine = indexed().await;
    let mut config = RetrieverConfig::new("chunks");
    config.title_aware = true;
    let r = HybridRetriever::new(engine.clone(), config);
    let hits = r.retrieve("knots", 5, QueryMode::Lexical).await.unwrap();
    assert_eq!(hits.identities(), vec!["knots.txt:0"]);

    let request = engine.recorded().pop().unwrap();
    let IndexQuery::Bool(b) = request.query else {
        panic!("expected a bool query");
    };
    assert!(b.must.is_empty());
    assert!(b
        .should
        .iter()
        .any(|q| matches!(q, IndexQuery::Match { field, .. } if field == TITLE_FIELD)));

    let plain = retriever(&engine).retrieve("knots", 5, QueryMode::Lexical).await.unwrap();
    assert!(plain.is_empty());
}

#[tokio::test]
async fn custom_rewrite_replaces_title_match() {
    let engine = indexed().await;
    let mut config = RetrieverConfig::new("chunks");
    config.title_aware = true;
    let identity = |req: SearchRequest, _text: &str| req;
    let hook: Arc<dyn QueryRewrite> = Arc::new(identity);
    let r = HybridRetriever::new(engine.clone(), config).with_rewrite(hook);
    assert!(r.retrieve("knots", 5, QueryMode::Lexical).await.unwrap().is_empty());
}

#[tokio::test]
async fn filters_reach_the_engine() {
    let engine = indexed().await;
    let query = Query::new("fire", 5, QueryMode::Lexical)
        .with_filter(serde_json::json!({"term": {"metadata.source_id": "shelter.txt"}}));
    let hits = retriever(&engine).search(&query).await.unwrap();
    assert_eq!(hits.identities(), vec!["shelter.txt:0"]);
}

#[test]
fn mode_comes_from_settings() {
    let settings = RetrievalSettings {
        mode: "bm25".into(),
        ..RetrievalSettings::default()
    };
    assert_eq!(RetrieverConfig::from_settings(&settings).unwrap().default_mode, QueryMode::Lexical);

    let bad = RetrievalSettings {
        mode: "sparse-dense".into(),
        ..RetrievalSettings::default()
    };
    assert!(matches!(RetrieverConfig::from_settings(&bad), Err(Error::UnsupportedMode(_))));
}

#[tokio::test]
async fn datasets_and_documents() {
    let engine = indexed().await;
    let r = retriever(&engine);
    let dataset = r.dataset();
    assert_eq!(
        dataset,
        Dataset {
            title: "chunks".into(),
            uri: "mem://test/chunks".into()
        }
    );
    assert_eq!(r.list_datasets(None, None), vec![dataset.clone()]);
    assert_eq!(r.list_datasets(Some("chunks"), None).len(), 1);
    assert!(r.list_datasets(Some("other"), None).is_empty());

    assert!(r.list_documents("missing").await.unwrap().is_empty());
    let docs = r.list_documents("water.txt:0").await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].title, "Water");
    assert_eq!(docs[0].url, "mem://test/chunks/_doc/water.txt:0");
    assert_eq!(docs[0].chunks[0].similarity_score, 1.0);
    assert_eq!(docs[0].metadata["source_id"], "water.txt");
}

#[tokio::test]
async fn relevant_documents_respect_the_dataset_filter() {
    let engine = indexed().await;
    let r = retriever(&engine);
    let other = Dataset {
        title: "other".into(),
        uri: "mem://test/other".into(),
    };
    let excluded = r.search_relevant_documents("water", &[other], 3).await.unwrap();
    assert!(excluded.documents.is_empty());

    let result = r.search_relevant_documents("boil water", &[r.dataset()], 2).await.unwrap();
    assert_eq!(result.query, "boil water");
    assert_eq!(result.datasets, vec![r.dataset()]);
    assert_eq!(result.documents.len(), 2);
    let first = &result.documents[0];
    assert_eq!(first.document_id, "water.txt:0");
    assert_eq!(first.chunks[0].content, "Boil water for one minute to make it safe to drink.");
    assert!(first.chunks[0].similarity_score > 0.0);

    let json = serde_json::to_value(&result).unwrap();
    assert!(json["documents"][0]["chunks"][0].get("similarity_score").is_some());
}
