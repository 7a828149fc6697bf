use std::sync::Arc;

pub use async_openai::config::{Config, OpenAIConfig};
use async_openai::{
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as OpenAIClient,
};
use async_trait::async_trait;

use super::{Embedder, EmbedderError};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug)]
pub struct OpenAiEmbedder<C: Config = OpenAIConfig> {
    client: OpenAIClient<C>,
    model: String,
}

impl<C: Config> OpenAiEmbedder<C> {
    pub fn with_config(config: C) -> Self {
        OpenAiEmbedder {
            client: OpenAIClient::with_config(config),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for OpenAiEmbedder<OpenAIConfig> {
    fn default() -> Self {
        OpenAiEmbedder::with_config(OpenAIConfig::default())
    }
}

impl<C: Config + Send + Sync + 'static> From<OpenAiEmbedder<C>> for Arc<dyn Embedder> {
    fn from(val: OpenAiEmbedder<C>) -> Self {
        Arc::new(val)
    }
}

#[async_trait]
impl<C: Config + Send + Sync> Embedder for OpenAiEmbedder<C> {
    async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f64>>, EmbedderError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(documents.into()))
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        Ok(response
            .data
            .into_iter()
            .map(|item| item.embedding.into_iter().map(f64::from).collect())
            .collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f64>, EmbedderError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .build()?;

        let mut response = self.client.embeddings().create(request).await?;
        if response.data.is_empty() {
            return Err(EmbedderError::EmptyResponse);
        }

        let item = response.data.swap_remove(0);
        Ok(item.embedding.into_iter().map(f64::from).collect())
    }
}
