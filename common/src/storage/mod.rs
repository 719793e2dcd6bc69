//! The named-blob storage contract (spec §4.1), backed by `object_store` —
//! already a teacher dependency via the old `StorageManager` in
//! `storage/store.rs`, whose local/memory backend split this module keeps.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjPath;
use object_store::ObjectStore;
use regex::Regex;

use crate::error::AppError;

/// Named-blob KV with deterministic enumeration and cheap namespacing.
#[async_trait]
pub trait PipelineStorage: Send + Sync {
    /// Lexicographically ordered keys under `base` matching `pattern`, capped at `max`.
    async fn find(
        &self,
        pattern: &Regex,
        base: Option<&str>,
        max: Option<usize>,
    ) -> Result<Vec<String>, AppError>;
    /// `None` for a missing key — not an error (spec §4.1).
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError>;
    async fn has(&self, key: &str) -> Result<bool, AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    async fn clear(&self) -> Result<(), AppError>;
    async fn keys(&self) -> Result<Vec<String>, AppError>;
    /// RFC3339 creation timestamp of `key`.
    async fn creation_date(&self, key: &str) -> Result<Option<String>, AppError>;
    /// A cheap, path-namespaced sub-scope.
    fn child(&self, name: &str) -> Arc<dyn PipelineStorage>;
}

/// `PipelineStorage` over any `object_store::ObjectStore` — local filesystem
/// and in-memory backends both implement this, matching spec §1's "concrete
/// blob/file I/O backends are a `PipelineStorage` capability, not part of the
/// core contract".
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreBackend {
    pub fn local(base_dir: &std::path::Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(base_dir)?;
        let store = LocalFileSystem::new_with_prefix(base_dir)
            .map_err(|e| AppError::Internal(format!("failed to open local storage: {e}")))?;
        Ok(Self {
            store: Arc::new(store),
            prefix: String::new(),
        })
    }

    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            prefix: String::new(),
        }
    }

    fn full_path(&self, key: &str) -> ObjPath {
        if self.prefix.is_empty() {
            ObjPath::from(key)
        } else {
            ObjPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            path
        } else {
            path.strip_prefix(&self.prefix)
                .and_then(|s| s.strip_prefix('/'))
                .unwrap_or(path)
        }
    }
}

#[async_trait]
impl PipelineStorage for ObjectStoreBackend {
    async fn find(
        &self,
        pattern: &Regex,
        base: Option<&str>,
        max: Option<usize>,
    ) -> Result<Vec<String>, AppError> {
        use futures::StreamExt;

        let list_prefix = match base {
            Some(b) => self.full_path(b),
            None if self.prefix.is_empty() => ObjPath::from(""),
            None => ObjPath::from(self.prefix.clone()),
        };
        let mut names: Vec<String> = self
            .store
            .list(Some(&list_prefix))
            .map(|meta| meta.map(|m| self.strip_prefix(m.location.as_ref()).to_string()))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, object_store::Error>>()?;
        names.retain(|n| pattern.is_match(n));
        names.sort();
        if let Some(max) = max {
            names.truncate(max);
        }
        Ok(names)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        match self.store.get(&self.full_path(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError> {
        self.store
            .put(&self.full_path(key), Bytes::from(value).into())
            .await?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        match self.store.delete(&self.full_path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), AppError> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, AppError> {
        let everything = Regex::new(".*").map_err(|e| AppError::Internal(e.to_string()))?;
        self.find(&everything, None, None).await
    }

    async fn creation_date(&self, key: &str) -> Result<Option<String>, AppError> {
        match self.store.head(&self.full_path(key)).await {
            Ok(meta) => Ok(Some(meta.last_modified.to_rfc3339())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn child(&self, name: &str) -> Arc<dyn PipelineStorage> {
        let prefix = if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        };
        Arc::new(Self {
            store: Arc::clone(&self.store),
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let storage = ObjectStoreBackend::memory();
        storage.set("a/b.json", b"hello".to_vec()).await.unwrap();
        assert_eq!(storage.get("a/b.json").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(storage.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_is_lexicographically_sorted_and_filtered() {
        let storage = ObjectStoreBackend::memory();
        for key in ["b.txt", "a.txt", "c.json"] {
            storage.set(key, b"x".to_vec()).await.unwrap();
        }
        let pattern = Regex::new(r"\.txt$").unwrap();
        let found = storage.find(&pattern, None, None).await.unwrap();
        assert_eq!(found, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[tokio::test]
    async fn child_namespaces_keys() {
        let storage = ObjectStoreBackend::memory();
        let child = storage.child("ns");
        child.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(storage.get("ns/k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(child.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn delete_missing_key_is_not_an_error() {
        let storage = ObjectStoreBackend::memory();
        storage.delete("nope").await.unwrap();
    }
}
