use async_openai::error::OpenAIError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("OpenAI error: {0}")]
    OpenAIError(#[from] OpenAIError),

    #[error("Network request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Embedder returned no vectors")]
    EmptyResponse,
}
