use async_openai::error::{ApiError, OpenAIError};
use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("OpenAI error: {0}")]
    OpenAIError(#[from] OpenAIError),

    #[error("Network request failed: {0}")]
    RequestError(#[from] ReqwestError),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] SerdeJsonError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Operation timed out")]
    Timeout(#[from] Elapsed),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider overloaded or unavailable: {0}")]
    ServerError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Missing API key for provider {0}")]
    MissingApiKey(String),

    #[error("Content not found in response: expected at {0}")]
    ContentNotFound(String),

    #[error("Error: {0}")]
    OtherError(String),
}

impl LLMError {
    /// Transient errors (rate limits, 5xx, network, timeouts) may be
    /// retried with backoff; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            LLMError::RateLimited(_)
            | LLMError::ServerError(_)
            | LLMError::Timeout(_)
            | LLMError::IoError(_) => true,
            LLMError::RequestError(e) => !e.is_builder(),
            LLMError::OpenAIError(e) => openai_transient(e),
            LLMError::SerdeError(_)
            | LLMError::AuthenticationError(_)
            | LLMError::InvalidRequest(_)
            | LLMError::UnknownProvider(_)
            | LLMError::MissingApiKey(_)
            | LLMError::ContentNotFound(_)
            | LLMError::OtherError(_) => false,
        }
    }
}

fn openai_transient(error: &OpenAIError) -> bool {
    match error {
        OpenAIError::Reqwest(_) | OpenAIError::StreamError(_) => true,
        OpenAIError::ApiError(ApiError { r#type, message, .. }) => {
            let kind = r#type.as_deref().unwrap_or_default();
            kind.contains("server_error")
                || kind.contains("rate_limit")
                || message.contains("overloaded")
        }
        _ => false,
    }
}
