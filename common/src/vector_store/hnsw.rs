//! A pure-Rust, in-process `BaseVectorStore` backed by `hnsw_rs`, grounded
//! directly on `ares-vector`'s `HnswIndex`/`Collection` split — the teacher's
//! own vector search lives entirely inside SurrealDB's HNSW index type and
//! has no standalone Rust value to generalize.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anndists::dist::distances::DistCosine;
use async_trait::async_trait;
use hnsw_rs::hnsw::Hnsw;
use parking_lot::RwLock;

use super::{BaseVectorStore, SearchHit, VectorDocument};
use crate::error::AppError;

const MAX_ELEMENTS: usize = 1_000_000;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;
const M: usize = 16;

/// One collection: a named, fixed-dimension HNSW index plus the side tables
/// needed to recover a document from the internal point id `hnsw_rs` returns.
pub struct HnswVectorStore {
    dimensions: usize,
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    id_to_internal: RwLock<HashMap<String, usize>>,
    documents: RwLock<HashMap<usize, VectorDocument>>,
    next_internal_id: AtomicUsize,
}

impl HnswVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            index: RwLock::new(Hnsw::new(M, MAX_ELEMENTS, MAX_LAYER, EF_CONSTRUCTION, DistCosine {})),
            id_to_internal: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            next_internal_id: AtomicUsize::new(0),
        }
    }

    fn insert_one(&self, doc: VectorDocument) -> Result<(), AppError> {
        if doc.vector.len() != self.dimensions {
            return Err(AppError::VectorStore(format!(
                "vector for '{}' has {} dimensions, expected {}",
                doc.id,
                doc.vector.len(),
                self.dimensions
            )));
        }
        let internal_id = self.next_internal_id.fetch_add(1, Ordering::SeqCst);
        self.index.write().insert((&doc.vector, internal_id));
        self.id_to_internal.write().insert(doc.id.clone(), internal_id);
        self.documents.write().insert(internal_id, doc);
        Ok(())
    }
}

#[async_trait]
impl BaseVectorStore for HnswVectorStore {
    async fn load_documents(&self, docs: Vec<VectorDocument>, overwrite: bool) -> Result<(), AppError> {
        if overwrite {
            self.index.write().reset();
            self.id_to_internal.write().clear();
            self.documents.write().clear();
            self.next_internal_id.store(0, Ordering::SeqCst);
        }
        for doc in docs {
            self.insert_one(doc)?;
        }
        Ok(())
    }

    async fn similarity_search_by_vector(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, AppError> {
        if query.len() != self.dimensions {
            return Err(AppError::VectorStore(format!(
                "query has {} dimensions, expected {}",
                query.len(),
                self.dimensions
            )));
        }
        let neighbours = self.index.read().search(query, k, EF_SEARCH);
        let documents = self.documents.read();
        let mut hits = Vec::with_capacity(neighbours.len());
        for neighbour in neighbours {
            if let Some(document) = documents.get(&neighbour.d_id) {
                // hnsw_rs reports cosine distance in [0, 2]; map to a [-1, 1] similarity score.
                let score = 1.0 - neighbour.distance;
                hits.push(SearchHit {
                    document: document.clone(),
                    score,
                });
            }
        }
        Ok(hits)
    }

    async fn filter_by_id(&self, ids: &[String]) -> Result<Vec<VectorDocument>, AppError> {
        let id_to_internal = self.id_to_internal.read();
        let documents = self.documents.read();
        Ok(ids
            .iter()
            .filter_map(|id| id_to_internal.get(id))
            .filter_map(|internal_id| documents.get(internal_id).cloned())
            .collect())
    }

    async fn search_by_id(&self, id: &str) -> Result<Option<VectorDocument>, AppError> {
        let internal_id = self.id_to_internal.read().get(id).copied();
        Ok(internal_id.and_then(|internal_id| self.documents.read().get(&internal_id).cloned()))
    }
}

/// A registry of `HnswVectorStore` instances keyed by collection name,
/// constructed lazily the first time a collection name is used.
#[derive(Default)]
pub struct HnswVectorStoreRegistry {
    collections: RwLock<HashMap<String, Arc<HnswVectorStore>>>,
}

impl HnswVectorStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, collection: &str, dimensions: usize) -> Arc<HnswVectorStore> {
        if let Some(existing) = self.collections.read().get(collection) {
            return Arc::clone(existing);
        }
        let mut collections = self.collections.write();
        Arc::clone(
            collections
                .entry(collection.to_string())
                .or_insert_with(|| Arc::new(HnswVectorStore::new(dimensions))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, vector: Vec<f32>) -> VectorDocument {
        VectorDocument {
            id: id.to_string(),
            text: None,
            vector,
            attributes: json!({}),
        }
    }

    #[tokio::test]
    async fn nearest_neighbour_ranks_closest_first() {
        let store = HnswVectorStore::new(3);
        store
            .load_documents(
                vec![
                    doc("a", vec![1.0, 0.0, 0.0]),
                    doc("b", vec![0.0, 1.0, 0.0]),
                    doc("c", vec![0.9, 0.1, 0.0]),
                ],
                true,
            )
            .await
            .unwrap();

        let hits = store
            .similarity_search_by_vector(&[1.0, 0.0, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].document.id == "a" || hits[0].document.id == "c");
    }

    #[tokio::test]
    async fn rejects_dimension_mismatch() {
        let store = HnswVectorStore::new(3);
        let err = store.load_documents(vec![doc("a", vec![1.0, 0.0])], true).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn overwrite_clears_prior_documents() {
        let store = HnswVectorStore::new(2);
        store.load_documents(vec![doc("a", vec![1.0, 0.0])], true).await.unwrap();
        store.load_documents(vec![doc("b", vec![0.0, 1.0])], true).await.unwrap();
        assert!(store.search_by_id("a").await.unwrap().is_none());
        assert!(store.search_by_id("b").await.unwrap().is_some());
    }
}
