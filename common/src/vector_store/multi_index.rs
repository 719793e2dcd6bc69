//! Fan a search out across N underlying stores, tag each hit with its source
//! index, and merge by score (spec §4.5 "Multi-index wrapper").
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{BaseVectorStore, SearchHit, VectorDocument};
use crate::error::AppError;
use crate::llm::EmbeddingModel;

/// ASCII unit separator. Chosen over `-` (spec §9 Open Questions) because
/// entity/community titles may themselves contain a dash, which would break
/// the round-trip the spec requires (property 7 in §8).
const ID_SEPARATOR: char = '\u{1f}';

pub struct MultiIndexVectorStore {
    indexes: HashMap<String, Arc<dyn BaseVectorStore>>,
}

impl MultiIndexVectorStore {
    pub fn new(indexes: HashMap<String, Arc<dyn BaseVectorStore>>) -> Self {
        Self { indexes }
    }

    fn encode_id(original_id: &str, index_name: &str) -> String {
        format!("{original_id}{ID_SEPARATOR}{index_name}")
    }

    /// Splits a multi-index id back into `(original_id, index_name)`.
    pub fn decode_id(encoded: &str) -> Option<(&str, &str)> {
        encoded.split_once(ID_SEPARATOR)
    }

    async fn search_one(
        name: &str,
        store: &Arc<dyn BaseVectorStore>,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let hits = store.similarity_search_by_vector(query, k).await?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                document: VectorDocument {
                    id: Self::encode_id(&hit.document.id, name),
                    ..hit.document
                },
                score: hit.score,
            })
            .collect())
    }
}

#[async_trait]
impl BaseVectorStore for MultiIndexVectorStore {
    async fn load_documents(&self, _docs: Vec<VectorDocument>, _overwrite: bool) -> Result<(), AppError> {
        Err(AppError::VectorStore(
            "MultiIndexVectorStore is read-only; load into the underlying index directly".to_string(),
        ))
    }

    async fn similarity_search_by_vector(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, AppError> {
        let futures = self
            .indexes
            .iter()
            .map(|(name, store)| Self::search_one(name, store, query, k));
        let per_index = try_join_all(futures).await?;
        let mut merged: Vec<SearchHit> = per_index.into_iter().flatten().collect();
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(k);
        Ok(merged)
    }

    async fn similarity_search_by_text(
        &self,
        text: &str,
        embedder: &dyn EmbeddingModel,
        k: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let embedding = embedder.embed(text).await?;
        let vector: Vec<f32> = embedding.iter().map(|v| *v as f32).collect();
        self.similarity_search_by_vector(&vector, k).await
    }

    async fn filter_by_id(&self, ids: &[String]) -> Result<Vec<VectorDocument>, AppError> {
        let mut out = Vec::new();
        for encoded in ids {
            let Some((original_id, index_name)) = Self::decode_id(encoded) else {
                continue;
            };
            if let Some(store) = self.indexes.get(index_name) {
                if let Some(doc) = store.search_by_id(original_id).await? {
                    out.push(VectorDocument {
                        id: encoded.clone(),
                        ..doc
                    });
                }
            }
        }
        Ok(out)
    }

    async fn search_by_id(&self, id: &str) -> Result<Option<VectorDocument>, AppError> {
        Ok(self.filter_by_id(std::slice::from_ref(&id.to_string())).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::hnsw::HnswVectorStore;
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
    async fn encoded_ids_round_trip_through_the_right_index() {
        let entities = Arc::new(HnswVectorStore::new(2));
        entities.load_documents(vec![doc("e1", vec![1.0, 0.0])], true).await.unwrap();
        let chunks = Arc::new(HnswVectorStore::new(2));
        chunks.load_documents(vec![doc("c1", vec![0.0, 1.0])], true).await.unwrap();

        let mut map: HashMap<String, Arc<dyn BaseVectorStore>> = HashMap::new();
        map.insert("entities".to_string(), entities);
        map.insert("chunks".to_string(), chunks);
        let multi = MultiIndexVectorStore::new(map);

        let hits = multi.similarity_search_by_vector(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        for hit in &hits {
            let (original_id, index_name) = MultiIndexVectorStore::decode_id(&hit.document.id).unwrap();
            assert!(["entities", "chunks"].contains(&index_name));
            assert!(!original_id.is_empty());
        }
    }

    #[test]
    fn delimiter_survives_dashes_in_the_original_id() {
        let encoded = MultiIndexVectorStore::encode_id("COCA-COLA", "entities");
        let (original_id, index_name) = MultiIndexVectorStore::decode_id(&encoded).unwrap();
        assert_eq!(original_id, "COCA-COLA");
        assert_eq!(index_name, "entities");
    }
}
