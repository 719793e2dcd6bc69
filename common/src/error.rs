use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Error kinds shared across the indexing pipeline and the search orchestrators.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("input error: {0}")]
    Input(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("transient LLM error: {0}")]
    LlmTransient(String),
    #[error("terminal LLM error: {0}")]
    LlmTerminal(String),
    #[error("storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("cancelled")]
    Cancelled,
    #[error("failed to parse row {row}: {reason}")]
    ParseFailed { row: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("vector store error: {0}")]
    VectorStore(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<OpenAIError> for AppError {
    /// Classifies the wire-level OpenAI error into the transient/terminal split §4.4 requires.
    fn from(err: OpenAIError) -> Self {
        match &err {
            OpenAIError::ApiError(api_err) => {
                let is_terminal = matches!(
                    api_err.r#type.as_deref(),
                    Some("invalid_request_error") | Some("authentication_error")
                );
                if is_terminal {
                    Self::LlmTerminal(err.to_string())
                } else {
                    Self::LlmTransient(err.to_string())
                }
            }
            OpenAIError::Reqwest(_) | OpenAIError::StreamError(_) => {
                Self::LlmTransient(err.to_string())
            }
            _ => Self::LlmTerminal(err.to_string()),
        }
    }
}

impl AppError {
    /// True for errors a caller should retry rather than surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LlmTransient(_) | Self::Storage(_))
    }
}
