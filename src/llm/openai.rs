use std::sync::Arc;

pub use async_openai::config::{Config, OpenAIConfig};
use async_openai::{
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionStreamOptions, CreateChatCompletionResponse,
        CreateChatCompletionStreamResponse,
    },
    Client as OpenAIClient,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;

use crate::schemas::{DisplaySink, GenerateResult, Message, MessageType, TokenUsage};

use super::{CallOptions, LLMError, ModelPricing, LLM};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

const OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "o4-mini"];

#[derive(Clone)]
pub struct OpenAI<C: Config = OpenAIConfig> {
    client: OpenAIClient<C>,
    model: String,
    options: CallOptions,
}

/// Request payload sent to an OpenAI-compatible chat endpoint.
#[derive(Serialize, Debug)]
struct OpenAIRequest {
    messages: Vec<ChatCompletionRequestMessage>,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<ChatCompletionStreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl<C: Config> OpenAI<C> {
    pub fn with_config(config: C) -> Self {
        Self {
            client: OpenAIClient::with_config(config),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            options: CallOptions::default(),
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        stream: bool,
    ) -> Result<OpenAIRequest, LLMError> {
        let messages = messages
            .into_iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OpenAIRequest {
            messages,
            model: self.model.clone(),
            stream: stream.then_some(true),
            stream_options: stream.then_some(ChatCompletionStreamOptions {
                include_usage: true,
            }),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            stop: self.options.stop_words.clone(),
            top_p: self.options.top_p,
        })
    }

    fn pricing(&self) -> ModelPricing {
        match self.model.as_str() {
            m if m.starts_with("gpt-4o-mini") => ModelPricing::new(0.15, 0.60),
            m if m.starts_with("gpt-4o") => ModelPricing::new(2.50, 10.00),
            m if m.starts_with("gpt-4.1-mini") => ModelPricing::new(0.40, 1.60),
            m if m.starts_with("gpt-4.1") => ModelPricing::new(2.00, 8.00),
            m if m.starts_with("o4-mini") => ModelPricing::new(1.10, 4.40),
            _ => ModelPricing::new(0.50, 1.50),
        }
    }
}

impl Default for OpenAI<OpenAIConfig> {
    fn default() -> Self {
        Self::with_config(OpenAIConfig::default())
    }
}

fn to_openai_message(message: Message) -> Result<ChatCompletionRequestMessage, LLMError> {
    let message = match message.message_type {
        MessageType::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        MessageType::Human => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        MessageType::Ai => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl<C: Config + Clone + Send + Sync + 'static> LLM for OpenAI<C> {
    async fn generate(&self, messages: Vec<Message>) -> Result<GenerateResult, LLMError> {
        let request = self.build_request(messages, false)?;
        let response: CreateChatCompletionResponse =
            self.client.chat().create_byot(request).await?;

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LLMError::ContentNotFound("choices[0].message.content".into()))?;

        Ok(GenerateResult::new(text, usage))
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<GenerateResult, LLMError> {
        let request = self.build_request(messages, true)?;
        let mut stream = self
            .client
            .chat()
            .create_stream_byot::<_, CreateChatCompletionStreamResponse>(request)
            .await?;

        let mut text = String::new();
        let mut usage: Option<TokenUsage> = None;

        while let Some(result) = stream.next().await {
            let chunk = result?;
            if let Some(content) = chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.as_deref())
            {
                sink.write(content).await?;
                text.push_str(content);
            }
            // With include_usage the final chunk reports totals.
            if let Some(chunk_usage) = chunk.usage {
                usage = Some(TokenUsage {
                    prompt_tokens: chunk_usage.prompt_tokens,
                    completion_tokens: chunk_usage.completion_tokens,
                    total_tokens: chunk_usage.total_tokens,
                });
            }
        }

        Ok(GenerateResult::new(text, usage))
    }

    async fn is_available(&self) -> Result<(), LLMError> {
        self.client.models().list().await?;
        Ok(())
    }

    fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        self.pricing().cost(usage)
    }

    fn models(&self) -> Vec<String> {
        OPENAI_MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn add_call_options(&mut self, options: CallOptions) {
        self.options = options;
    }
}
