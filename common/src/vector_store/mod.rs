//! The vector-store contract (spec §4.5).
pub mod hnsw;
pub mod multi_index;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;
use crate::llm::EmbeddingModel;

#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub id: String,
    pub text: Option<String>,
    pub vector: Vec<f32>,
    pub attributes: Value,
}

/// A similarity-search hit: the stored document plus a score in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: VectorDocument,
    pub score: f32,
}

/// Collection-scoped document upsert and similarity search.
#[async_trait]
pub trait BaseVectorStore: Send + Sync {
    /// Establish or validate whatever backing connection the implementation
    /// needs (spec §4.5). In-process backends have nothing to connect to
    /// and no-op.
    async fn connect(&self, _params: Value) -> Result<(), AppError> {
        Ok(())
    }
    async fn load_documents(&self, docs: Vec<VectorDocument>, overwrite: bool) -> Result<(), AppError>;
    async fn similarity_search_by_vector(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, AppError>;
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
    async fn filter_by_id(&self, ids: &[String]) -> Result<Vec<VectorDocument>, AppError>;
    async fn search_by_id(&self, id: &str) -> Result<Option<VectorDocument>, AppError>;
}

/// Collection naming per spec §4.5: `"{container}-{field_name}"`, dots
/// replaced by dashes.
pub fn collection_name(container: &str, field_name: &str) -> String {
    format!("{container}-{field_name}").replace('.', "-")
}

pub const KNOWN_EMBEDDING_FIELDS: &[&str] = &[
    "entity.description",
    "relationship.description",
    "community.full_content",
    "text_unit.text",
];

/// Validates `field_name` against the closed set of known embedding fields.
pub fn validate_embedding_field(field_name: &str) -> Result<(), AppError> {
    if KNOWN_EMBEDDING_FIELDS.contains(&field_name) {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "'{field_name}' is not a known embedding field (expected one of {KNOWN_EMBEDDING_FIELDS:?})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_replaces_dots() {
        assert_eq!(collection_name("run1", "entity.description"), "run1-entity-description");
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(validate_embedding_field("entity.bogus").is_err());
        assert!(validate_embedding_field("entity.description").is_ok());
    }
}
