use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hopsearch_core::config::EmbeddingSettings;
use hopsearch_core::similarity::cosine_similarity;
use hopsearch_core::traits::Embedder;
use hopsearch_core::Error;
use hopsearch_embed::{get_default_embedder, CachedEmbedder, HashEmbedder, ModelCache};

#[test]
fn hash_embedder_shapes_and_determinism() {
    let embedder = HashEmbedder::new(64);
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_many(&texts, 1).expect("embed_many");
    let v1 = &embs[0];

    assert_eq!(v1.len(), 64);
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    assert!(v1.iter().all(|x| *x >= 0.0));
    for (a, b) in v1.iter().zip(embs[1].iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
    assert_eq!(embedder.dimension().unwrap(), 64);
}

#[test]
fn output_order_matches_input_order() {
    let embedder = HashEmbedder::new(128);
    let texts: Vec<String> = ["paris", "berlin", "rome", "madrid"].iter().map(|s| s.to_string()).collect();
    let batched = embedder.embed_many(&texts, 3).unwrap();
    for (text, v) in texts.iter().zip(&batched) {
        assert_eq!(&embedder.embed_one(text).unwrap(), v);
    }
}

#[test]
fn shared_words_raise_similarity() {
    let e = HashEmbedder::new(256);
    let q = e.embed_one("What is the capital of France?").unwrap();
    let near = e.embed_one("('Paris', 'capital_of', 'France')").unwrap();
    let far = e.embed_one("('Berlin', 'located_in', 'Germany')").unwrap();
    assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
}

#[test]
fn settings_select_the_hash_embedder() {
    let settings = EmbeddingSettings {
        use_fake: true,
        fake_dim: 32,
        ..EmbeddingSettings::default()
    };
    let embedder = get_default_embedder(&settings).expect("embedder");
    assert_eq!(embedder.dimension().unwrap(), 32);
    assert_eq!(embedder.model_id(), "hash-32");
}

#[test]
fn missing_model_is_unavailable_on_every_call() {
    let embedder = CachedEmbedder::new("/nonexistent/model/dir", 256, 1);
    assert!(matches!(embedder.embed_one("x"), Err(Error::ModelUnavailable(_))));
    assert!(matches!(embedder.dimension(), Err(Error::ModelUnavailable(_))));
    assert!(matches!(
        embedder.embed_many(&["a".to_string(), "b".to_string()], 2),
        Err(Error::ModelUnavailable(_))
    ));
}

#[test]
fn cache_loads_each_model_once() {
    let cache: ModelCache<String> = ModelCache::new(2);
    let loads = AtomicUsize::new(0);
    let load = || {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok("weights".to_string())
    };
    let a = cache.get_or_load("m", load).unwrap();
    let b = cache.get_or_load("m", load).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn evicted_model_is_reused_while_referenced() {
    let cache: ModelCache<String> = ModelCache::new(1);
    let loads = AtomicUsize::new(0);
    let load = || {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok("weights".to_string())
    };

    let held = cache.get_or_load("m", load).unwrap();
    cache.evict("m");
    let again = cache.get_or_load("m", load).unwrap();
    assert!(Arc::ptr_eq(&held, &again));
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    drop(held);
    drop(again);
    cache.evict("m");
    let _fresh = cache.get_or_load("m", load).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_load_is_not_cached() {
    let cache: ModelCache<String> = ModelCache::new(1);
    assert!(cache.get_or_load("m", || Err(anyhow::anyhow!("no weights"))).is_err());
    assert!(!cache.contains("m"));
    assert!(cache.get_or_load("m", || Ok("ok".to_string())).is_ok());
}
