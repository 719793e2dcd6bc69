//! The process-wide language-model registry (spec §4.4, §9 "Global
//! singleton"). `get_or_create` is idempotent; callers that need isolated
//! state (spec §9: "when embedded in a larger host, it must accept a scope
//! argument so multiple pipelines do not share state") construct their own
//! `LanguageModelManager` instance rather than reaching for a `static`.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::Client;

use super::mock::{MockChatModel, MockEmbeddingModel};
use super::openai::{OpenAiChatModel, OpenAiEmbeddingModel};
use super::{ChatModel, EmbeddingModel};
use crate::error::AppError;

/// Tagged-variant config per spec §9 "Tagged-variant configs" — a sum type
/// instead of a subclass hierarchy, with a total match in `get_or_create`.
#[derive(Clone)]
pub enum ModelConfig {
    OpenAiChat {
        api_key: String,
        base_url: Option<String>,
        model: String,
        concurrent_requests: usize,
        requests_per_minute: u32,
        tokens_per_minute: u32,
        max_retries: usize,
        request_timeout: Duration,
    },
    OpenAiEmbedding {
        api_key: String,
        base_url: Option<String>,
        model: String,
        dimensions: Option<u32>,
        concurrent_requests: usize,
        requests_per_minute: u32,
        tokens_per_minute: u32,
    },
    MockChat {
        response: String,
    },
    MockEmbedding {
        dimensions: usize,
    },
}

#[derive(Default)]
pub struct LanguageModelManager {
    chat_models: RwLock<HashMap<String, Arc<dyn ChatModel>>>,
    embedding_models: RwLock<HashMap<String, Arc<dyn EmbeddingModel>>>,
}

impl LanguageModelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_chat(&self, name: &str) -> Option<Arc<dyn ChatModel>> {
        self.chat_models.read().expect("lock poisoned").get(name).cloned()
    }

    pub fn get_embedding(&self, name: &str) -> Option<Arc<dyn EmbeddingModel>> {
        self.embedding_models
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
    }

    /// Builds the named model from `config` on first call; subsequent calls
    /// with the same name return the already-registered instance.
    pub fn get_or_create_chat(&self, name: &str, config: ModelConfig) -> Result<Arc<dyn ChatModel>, AppError> {
        if let Some(existing) = self.get_chat(name) {
            return Ok(existing);
        }
        let model: Arc<dyn ChatModel> = match config {
            ModelConfig::OpenAiChat {
                api_key,
                base_url,
                model,
                concurrent_requests,
                requests_per_minute,
                tokens_per_minute,
                max_retries,
                request_timeout,
            } => {
                let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
                if let Some(base_url) = base_url {
                    openai_config = openai_config.with_api_base(base_url);
                }
                Arc::new(OpenAiChatModel::new(
                    Client::with_config(openai_config),
                    model,
                    concurrent_requests,
                    requests_per_minute,
                    tokens_per_minute,
                    max_retries,
                    request_timeout,
                ))
            }
            ModelConfig::MockChat { response } => Arc::new(MockChatModel::fixed(response)),
            ModelConfig::OpenAiEmbedding { .. } | ModelConfig::MockEmbedding { .. } => {
                return Err(AppError::Config(format!(
                    "model '{name}' was registered with an embedding config under get_or_create_chat"
                )));
            }
        };
        self.chat_models
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), Arc::clone(&model));
        Ok(model)
    }

    pub fn get_or_create_embedding(
        &self,
        name: &str,
        config: ModelConfig,
    ) -> Result<Arc<dyn EmbeddingModel>, AppError> {
        if let Some(existing) = self.get_embedding(name) {
            return Ok(existing);
        }
        let model: Arc<dyn EmbeddingModel> = match config {
            ModelConfig::OpenAiEmbedding {
                api_key,
                base_url,
                model,
                dimensions,
                concurrent_requests,
                requests_per_minute,
                tokens_per_minute,
            } => {
                let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
                if let Some(base_url) = base_url {
                    openai_config = openai_config.with_api_base(base_url);
                }
                Arc::new(OpenAiEmbeddingModel::new(
                    Client::with_config(openai_config),
                    model,
                    dimensions,
                    concurrent_requests,
                    requests_per_minute,
                    tokens_per_minute,
                ))
            }
            ModelConfig::MockEmbedding { dimensions } => Arc::new(MockEmbeddingModel::new(dimensions)),
            ModelConfig::OpenAiChat { .. } | ModelConfig::MockChat { .. } => {
                return Err(AppError::Config(format!(
                    "model '{name}' was registered with a chat config under get_or_create_embedding"
                )));
            }
        };
        self.embedding_models
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), Arc::clone(&model));
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let manager = LanguageModelManager::new();
        let a = manager
            .get_or_create_chat("default", ModelConfig::MockChat { response: "a".into() })
            .unwrap();
        let b = manager
            .get_or_create_chat("default", ModelConfig::MockChat { response: "b".into() })
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rejects_mismatched_capability() {
        let manager = LanguageModelManager::new();
        let err = manager.get_or_create_chat("x", ModelConfig::MockEmbedding { dimensions: 3 });
        assert!(err.is_err());
    }
}
