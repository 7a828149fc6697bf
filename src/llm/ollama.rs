use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::schemas::{DisplaySink, GenerateResult, Message, MessageType, TokenUsage};

use super::{CallOptions, LLMError, LLM};

pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local Ollama server. No API key, no cost.
#[derive(Clone)]
pub struct Ollama {
    client: Client,
    base_url: String,
    model: String,
    options: CallOptions,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
}

#[derive(Serialize)]
struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl Default for Ollama {
    fn default() -> Self {
        Self::new()
    }
}

impl Ollama {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            options: CallOptions::default(),
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    fn build_request(&self, messages: Vec<Message>, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages
                .into_iter()
                .map(|m| ChatMessage {
                    role: match m.message_type {
                        MessageType::System => "system".to_string(),
                        MessageType::Ai => "assistant".to_string(),
                        MessageType::Human => "user".to_string(),
                    },
                    content: m.content,
                })
                .collect(),
            stream,
            options: Some(GenerationOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
                top_p: self.options.top_p,
            }),
        }
    }

    fn usage_from(response: &ChatResponse) -> TokenUsage {
        TokenUsage::new(
            response.prompt_eval_count.unwrap_or(0),
            response.eval_count.unwrap_or(0),
        )
    }
}

#[async_trait]
impl LLM for Ollama {
    async fn generate(&self, messages: Vec<Message>) -> Result<GenerateResult, LLMError> {
        let request = self.build_request(messages, false);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LLMError::ServerError(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        let response: ChatResponse = response.json().await?;
        let text = response
            .message
            .as_ref()
            .map(|m| m.content.clone())
            .ok_or_else(|| LLMError::ContentNotFound("message.content".into()))?;

        Ok(GenerateResult::new(text, Some(Self::usage_from(&response))))
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<GenerateResult, LLMError> {
        let request = self.build_request(messages, true);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LLMError::ServerError(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        // Ollama streams newline-delimited JSON objects.
        let mut text = String::new();
        let mut usage = TokenUsage::default();
        let mut buffer = String::new();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let parsed: ChatResponse = serde_json::from_str(line)?;
                if let Some(message) = &parsed.message {
                    if !message.content.is_empty() {
                        sink.write(&message.content).await?;
                        text.push_str(&message.content);
                    }
                }
                if parsed.done {
                    usage = Self::usage_from(&parsed);
                }
            }
        }

        Ok(GenerateResult::new(text, Some(usage)))
    }

    async fn is_available(&self) -> Result<(), LLMError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LLMError::ServerError(format!(
                "ollama returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn calculate_cost(&self, _usage: &TokenUsage) -> f64 {
        0.0
    }

    fn models(&self) -> Vec<String> {
        vec![self.model.clone()]
    }

    fn add_call_options(&mut self, options: CallOptions) {
        self.options = options;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "message": { "role": "assistant", "content": "hi there" },
                    "done": true,
                    "prompt_eval_count": 5,
                    "eval_count": 3
                })
                .to_string(),
            )
            .create_async()
            .await;

        let ollama = Ollama::new().with_base_url(server.url());
        let result = ollama
            .generate(vec![Message::new_human_message("hi")])
            .await
            .unwrap();

        assert_eq!(result.text, "hi there");
        assert_eq!(result.usage.unwrap().total_tokens, 8);
        assert_eq!(ollama.calculate_cost(&TokenUsage::new(100, 100)), 0.0);
    }
}
