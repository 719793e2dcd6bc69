//! The language-model manager (spec §4.4): `ChatModel`/`EmbeddingModel`
//! capability traits, a registry, and the rate-limit/retry machinery that
//! lives at this boundary.
pub mod manager;
pub mod mock;
pub mod openai;
pub mod rate_limiter;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::AppError;

/// One turn of chat history.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub temperature: Option<f32>,
    pub json_schema: Option<(String, serde_json::Value)>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatMetrics {
    pub prompt_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub history: Vec<ChatMessage>,
    pub metrics: ChatMetrics,
    pub cache_hit: bool,
}

/// A named chat-completion capability. Implementations own their own rate
/// limiting and retry policy (spec §4.4 "Rate limiting is enforced inside the
/// model wrapper").
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<ChatResponse, AppError>;

    /// Lazy sequence of response deltas; the default implementation just
    /// yields the whole `chat()` response as one delta, which is sufficient
    /// for any implementation that has no native streaming transport.
    async fn chat_stream(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
        let response = self.chat(prompt, history, params).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(response.content) })))
    }
}

/// A named embedding capability.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, AppError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AppError>;
}
