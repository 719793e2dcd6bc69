//! Deterministic stand-ins for `ChatModel`/`EmbeddingModel`, used throughout
//! this workspace's tests in place of a network call — the same role the
//! teacher's in-memory SurrealDB instance plays for storage in its own tests.
use async_trait::async_trait;

use super::{ChatMessage, ChatMetrics, ChatModel, ChatParams, ChatResponse};
use crate::error::AppError;

/// Returns a fixed response, or runs `responder` over the prompt when set.
pub struct MockChatModel {
    responder: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl MockChatModel {
    pub fn fixed(response: impl Into<String>) -> Self {
        let response = response.into();
        Self {
            responder: Box::new(move |_| response.clone()),
        }
    }

    pub fn with_responder(responder: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
        }
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        _params: &ChatParams,
    ) -> Result<ChatResponse, AppError> {
        let content = (self.responder)(prompt);
        Ok(ChatResponse {
            content,
            history: history.to_vec(),
            metrics: ChatMetrics::default(),
            cache_hit: false,
        })
    }
}

/// Deterministic embeddings: a hash of the text spread across `dimensions`.
pub struct MockEmbeddingModel {
    dimensions: usize,
}

impl MockEmbeddingModel {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl crate::llm::EmbeddingModel for MockEmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, AppError> {
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        Ok((0..self.dimensions)
            .map(|i| {
                let b = bytes[i % bytes.len()];
                (f64::from(b) / 255.0) * 2.0 - 1.0
            })
            .collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AppError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
