use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};

use crate::schemas::{DisplaySink, GenerateResult, Message, MessageType, TokenUsage};

use super::{CallOptions, LLMError, ModelPricing, LLM};

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const CLAUDE_MODELS: &[&str] = &[
    "claude-opus-4-20250514",
    "claude-sonnet-4-20250514",
    "claude-3-5-haiku-20241022",
];

#[derive(Clone)]
pub struct Claude {
    model: String,
    options: CallOptions,
    api_key: String,
    anthropic_version: String,
    base_url: String,
}

#[derive(Serialize)]
struct Payload {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
struct ClaudeMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl Default for Claude {
    fn default() -> Self {
        Self::new()
    }
}

impl Claude {
    pub fn new() -> Self {
        Self {
            model: DEFAULT_CLAUDE_MODEL.to_string(),
            options: CallOptions::default(),
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            anthropic_version: DEFAULT_ANTHROPIC_VERSION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
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

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_payload(&self, messages: Vec<Message>, stream: bool) -> Payload {
        let (system, chat): (Vec<_>, Vec<_>) = messages
            .into_iter()
            .partition(|m| m.message_type == MessageType::System);

        Payload {
            model: self.model.clone(),
            system: system.into_iter().next().map(|m| m.content),
            messages: chat
                .into_iter()
                .map(|m| ClaudeMessage {
                    role: match m.message_type {
                        MessageType::Ai => "assistant",
                        _ => "user",
                    },
                    content: m.content,
                })
                .collect(),
            max_tokens: self.options.max_tokens.unwrap_or(1024),
            stream: stream.then_some(true),
            stop_sequences: self.options.stop_words.clone(),
            temperature: self.options.temperature,
            top_p: self.options.top_p,
        }
    }

    fn request(&self, payload: &Payload) -> reqwest::RequestBuilder {
        Client::new()
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.anthropic_version)
            .header("content-type", "application/json; charset=utf-8")
            .json(payload)
    }

    fn map_status(&self, status: u16) -> Option<LLMError> {
        match status {
            200..=299 => None,
            401 => Some(LLMError::AuthenticationError("invalid API key".into())),
            403 => Some(LLMError::AuthenticationError("permission denied".into())),
            404 => Some(LLMError::InvalidRequest(format!(
                "model {} not found",
                self.model
            ))),
            429 => Some(LLMError::RateLimited("rate limit exceeded".into())),
            529 | 503 => Some(LLMError::ServerError("overloaded".into())),
            code if code >= 500 => Some(LLMError::ServerError(format!("status {code}"))),
            code => Some(LLMError::InvalidRequest(format!("status {code}"))),
        }
    }

    fn pricing(&self) -> ModelPricing {
        match self.model.as_str() {
            m if m.contains("opus") => ModelPricing::new(15.00, 75.00),
            m if m.contains("haiku") => ModelPricing::new(0.80, 4.00),
            _ => ModelPricing::new(3.00, 15.00),
        }
    }
}

#[async_trait]
impl LLM for Claude {
    async fn generate(&self, messages: Vec<Message>) -> Result<GenerateResult, LLMError> {
        let payload = self.build_payload(messages, false);
        let response = self.request(&payload).send().await?;

        if let Some(error) = self.map_status(response.status().as_u16()) {
            return Err(error);
        }

        let response: ApiResponse = response.json().await?;
        let text = response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| LLMError::ContentNotFound("content[0].text".into()))?;

        let usage = TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens);

        Ok(GenerateResult::new(text, Some(usage)))
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<GenerateResult, LLMError> {
        let payload = self.build_payload(messages, true);
        let mut source = self
            .request(&payload)
            .eventsource()
            .map_err(|e| LLMError::OtherError(e.to_string()))?;

        let mut text = String::new();
        let mut input_tokens = 0;
        let mut output_tokens = 0;

        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    let data: serde_json::Value = serde_json::from_str(&message.data)?;
                    match data["type"].as_str().unwrap_or_default() {
                        "message_start" => {
                            input_tokens =
                                data["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0);
                        }
                        "content_block_delta" => {
                            if let Some(chunk) = data["delta"]["text"].as_str() {
                                sink.write(chunk).await?;
                                text.push_str(chunk);
                            }
                        }
                        "message_delta" => {
                            output_tokens =
                                data["usage"]["output_tokens"].as_u64().unwrap_or(output_tokens);
                        }
                        "message_stop" => {
                            source.close();
                            break;
                        }
                        _ => {}
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    source.close();
                    return Err(LLMError::OtherError(e.to_string()));
                }
            }
        }

        let usage = TokenUsage::new(input_tokens as u32, output_tokens as u32);
        Ok(GenerateResult::new(text, Some(usage)))
    }

    async fn is_available(&self) -> Result<(), LLMError> {
        if self.api_key.is_empty() {
            return Err(LLMError::MissingApiKey("anthropic".into()));
        }
        Ok(())
    }

    fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        self.pricing().cost(usage)
    }

    fn models(&self) -> Vec<String> {
        CLAUDE_MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn add_call_options(&mut self, options: CallOptions) {
        self.options = options;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_splits_system_prompt() {
        let claude = Claude::new().with_options(CallOptions::new().with_max_tokens(256));
        let payload = claude.build_payload(
            vec![
                Message::new_system_message("be brief"),
                Message::new_human_message("hello"),
            ],
            false,
        );

        assert_eq!(payload.system.as_deref(), Some("be brief"));
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(payload.messages[0].role, "user");
        assert_eq!(payload.max_tokens, 256);
        assert!(payload.stream.is_none());
    }

    #[test]
    fn test_status_mapping() {
        let claude = Claude::new();
        assert!(matches!(
            claude.map_status(429),
            Some(LLMError::RateLimited(_))
        ));
        assert!(matches!(
            claude.map_status(529),
            Some(LLMError::ServerError(_))
        ));
        assert!(matches!(
            claude.map_status(400),
            Some(LLMError::InvalidRequest(_))
        ));
        assert!(claude.map_status(200).is_none());
    }

    #[tokio::test]
    async fn test_generate_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "content": [{ "type": "text", "text": "pong" }],
                    "usage": { "input_tokens": 7, "output_tokens": 2 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let claude = Claude::new()
            .with_api_key("test-key")
            .with_base_url(server.url());
        let result = claude
            .generate(vec![Message::new_human_message("ping")])
            .await
            .unwrap();

        assert_eq!(result.text, "pong");
        assert_eq!(result.usage.unwrap().total_tokens, 9);
    }
}
