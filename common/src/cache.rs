//! The LLM-call memoization cache (spec §4.2). The teacher has no cache layer
//! at all; this is built fresh, grounded on the `cache/pipeline_cache.rs` /
//! `cache/memory_pipeline_cache.rs` shape in the reference implementation this
//! system was derived from, and on the teacher's own `PipelineStorage`-over-
//! `object_store` idiom for the file-backed variant.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::AppError;
use crate::storage::PipelineStorage;

/// Namespaced key-value cache. Keys are opaque; the producer computes a
/// content-addressed key from `(prompt, model_id, parameters)`.
#[async_trait]
pub trait PipelineCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError>;
    async fn has(&self, key: &str) -> Result<bool, AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    async fn clear(&self) -> Result<(), AppError>;
    /// A cheap, namespaced sub-scope.
    fn child(&self, name: &str) -> Arc<dyn PipelineCache>;
}

/// In-process cache, the default and the one used throughout tests.
#[derive(Clone, Default)]
pub struct MemoryCache {
    prefix: String,
    store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn scoped(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl PipelineCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        Ok(self.store.read().get(&self.scoped(key)).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError> {
        self.store.write().insert(self.scoped(key), value);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.store.read().contains_key(&self.scoped(key)))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.store.write().remove(&self.scoped(key));
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        let prefix = self.scoped("");
        self.store.write().retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    fn child(&self, name: &str) -> Arc<dyn PipelineCache> {
        Arc::new(Self {
            prefix: self.scoped(name),
            store: Arc::clone(&self.store),
        })
    }
}

/// A cache that is just a thin, namespaced view over `PipelineStorage` — the
/// same relationship the reference `pipeline_cache`/`memory_pipeline_cache`
/// split has, generalized to any storage backend instead of only blob/file.
pub struct JsonFileCache {
    storage: Arc<dyn PipelineStorage>,
}

impl JsonFileCache {
    pub fn new(storage: Arc<dyn PipelineStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PipelineCache for JsonFileCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.storage.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError> {
        self.storage.set(key, value).await
    }

    async fn has(&self, key: &str) -> Result<bool, AppError> {
        self.storage.has(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.storage.delete(key).await
    }

    async fn clear(&self) -> Result<(), AppError> {
        self.storage.clear().await
    }

    fn child(&self, name: &str) -> Arc<dyn PipelineCache> {
        Arc::new(Self {
            storage: self.storage.child(name),
        })
    }
}

/// Content-addressed cache key for an LLM call: `(model_id, params, prompt)`.
pub fn llm_cache_key(model_id: &str, params_json: &str, prompt: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model_id.as_bytes());
    hasher.update(&[0x1]);
    hasher.update(params_json.as_bytes());
    hasher.update(&[0x1]);
    hasher.update(prompt.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_roundtrips() {
        let cache = MemoryCache::new();
        assert!(!cache.has("k").await.unwrap());
        cache.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn child_scopes_are_isolated() {
        let cache = MemoryCache::new();
        let child = cache.child("ns");
        child.set("k", b"child".to_vec()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(child.get("k").await.unwrap(), Some(b"child".to_vec()));
    }

    #[test]
    fn cache_key_is_deterministic_and_sensitive_to_each_input() {
        let a = llm_cache_key("gpt", "{}", "hello");
        let b = llm_cache_key("gpt", "{}", "hello");
        let c = llm_cache_key("gpt", "{}", "world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
