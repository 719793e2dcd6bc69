//! `ChatModel`/`EmbeddingModel` backed by `async-openai`, the teacher's
//! established wire-protocol idiom (`common/src/utils/embedding.rs`'s
//! `generate_embedding`, `pipeline/services.rs`'s `prepare_llm_request` with
//! strict `ResponseFormat::JsonSchema`).
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::instrument;

use super::rate_limiter::RateLimiter;
use super::{ChatMessage, ChatMetrics, ChatModel, ChatParams, ChatResponse, ChatRole, EmbeddingModel};
use crate::error::AppError;

pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    limiter: RateLimiter,
    max_retries: usize,
    request_timeout: Duration,
}

impl OpenAiChatModel {
    pub fn new(
        client: Client<OpenAIConfig>,
        model: String,
        concurrent_requests: usize,
        requests_per_minute: u32,
        tokens_per_minute: u32,
        max_retries: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            model,
            limiter: RateLimiter::new(concurrent_requests, requests_per_minute, tokens_per_minute),
            max_retries,
            request_timeout,
        }
    }

    fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, AppError> {
        let msg = match message.role {
            ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
        };
        msg.map_err(AppError::from)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    #[instrument(level = "trace", skip_all, fields(model = %self.model))]
    async fn chat(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<ChatResponse, AppError> {
        let estimated_tokens = (prompt.len() / 4).max(1) as u32;
        let _lease = self.limiter.acquire(estimated_tokens).await;

        let mut messages = Vec::with_capacity(history.len() + 1);
        for message in history {
            messages.push(Self::to_request_message(message)?);
        }
        messages.push(Self::to_request_message(&ChatMessage {
            role: ChatRole::User,
            content: prompt.to_string(),
        })?);

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(messages);
        if let Some(temperature) = params.temperature {
            builder.temperature(temperature);
        }
        if let Some((name, schema)) = &params.json_schema {
            builder.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: name.clone(),
                    schema: Some(schema.clone()),
                    strict: Some(true),
                },
            });
        }
        let request = builder.build()?;

        let strategy = ExponentialBackoff::from_millis(500)
            .map(jitter)
            .take(self.max_retries);
        let client = &self.client;
        let timeout = self.request_timeout;
        let response = Retry::spawn(strategy, || async {
            tokio::time::timeout(timeout, client.chat().create(request.clone()))
                .await
                .map_err(|_| AppError::LlmTransient("request timed out".to_string()))?
                .map_err(AppError::from)
                .and_then(|resp| {
                    if resp.choices.is_empty() {
                        Err(AppError::LlmTransient("empty choices".to_string()))
                    } else {
                        Ok(resp)
                    }
                })
        })
        .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LlmTerminal("no choices returned".to_string()))?;
        let content = choice.message.content.unwrap_or_default();
        let metrics = response
            .usage
            .map(|u| ChatMetrics {
                prompt_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let mut new_history = history.to_vec();
        new_history.push(ChatMessage {
            role: ChatRole::User,
            content: prompt.to_string(),
        });
        new_history.push(ChatMessage {
            role: ChatRole::Assistant,
            content: content.clone(),
        });

        Ok(ChatResponse {
            content,
            history: new_history,
            metrics,
            cache_hit: false,
        })
    }
}

pub struct OpenAiEmbeddingModel {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: Option<u32>,
    limiter: RateLimiter,
}

impl OpenAiEmbeddingModel {
    pub fn new(
        client: Client<OpenAIConfig>,
        model: String,
        dimensions: Option<u32>,
        concurrent_requests: usize,
        requests_per_minute: u32,
        tokens_per_minute: u32,
    ) -> Self {
        Self {
            client,
            model,
            dimensions,
            limiter: RateLimiter::new(concurrent_requests, requests_per_minute, tokens_per_minute),
        }
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, AppError> {
        let vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("embedding response was empty".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let estimated_tokens = texts.iter().map(|t| (t.len() / 4).max(1) as u32).sum();
        let _lease = self.limiter.acquire(estimated_tokens).await;

        let mut builder = CreateEmbeddingRequestArgs::default();
        builder.model(&self.model).input(texts.to_vec());
        if let Some(dimensions) = self.dimensions {
            builder.dimensions(dimensions);
        }
        let request = builder.build()?;
        let response = self.client.embeddings().create(request).await?;
        Ok(response
            .data
            .into_iter()
            .map(|d| d.embedding.into_iter().map(f64::from).collect())
            .collect())
    }
}
