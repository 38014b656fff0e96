//! Process-wide model cache.
//!
//! Models live in a bounded LRU keyed by model identifier. Next to it sits a
//! table of weak references: a model evicted from the LRU while some caller
//! still holds it is handed back instead of being loaded a second time.

use anyhow::{anyhow, Result};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

pub struct ModelCache<M> {
    live: Cache<String, Arc<M>>,
    weak: Mutex<HashMap<String, Weak<M>>>,
}

impl<M: Send + Sync + 'static> ModelCache<M> {
    pub fn new(capacity: u64) -> Self {
        Self {
            live: Cache::builder()
                .max_capacity(capacity.max(1))
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            weak: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<Arc<M>>
    where
        F: FnOnce() -> Result<M>,
    {
        if let Some(model) = self.live.get(key) {
            return Ok(model);
        }
        // Loads are serialized so two callers never build the same model.
        let mut weak = self.weak.lock().map_err(|_| anyhow!("model cache lock poisoned"))?;
        if let Some(model) = self.live.get(key) {
            return Ok(model);
        }
        if let Some(model) = weak.get(key).and_then(Weak::upgrade) {
            debug!(key, "model still referenced, reusing");
            self.live.insert(key.to_string(), Arc::clone(&model));
            return Ok(model);
        }
        let model = Arc::new(load()?);
        weak.retain(|_, w| w.strong_count() > 0);
        weak.insert(key.to_string(), Arc::downgrade(&model));
        self.live.insert(key.to_string(), Arc::clone(&model));
        Ok(model)
    }

    /// Drops the cache's own reference. Holders keep theirs.
    pub fn evict(&self, key: &str) {
        self.live.invalidate(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live.contains_key(key)
    }
}
