use std::sync::Arc;

use async_trait::async_trait;

use crate::schemas::{DisplaySink, GenerateResult, Message, TokenUsage};

use super::{CallOptions, LLMError};

/// Uniform surface over chat-completion providers. The engine only ever
/// talks to `dyn LLM`; a provider is selected by name through the factory.
#[async_trait]
pub trait LLM: Sync + Send + LLMClone {
    /// One non-streaming generation.
    async fn generate(&self, messages: Vec<Message>) -> Result<GenerateResult, LLMError>;

    /// Streams tokens into `sink` as they arrive and returns the full
    /// result once the provider closes the stream.
    async fn stream(
        &self,
        messages: Vec<Message>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<GenerateResult, LLMError>;

    /// Cheap reachability/credential check; does not consume tokens where
    /// the provider allows it.
    async fn is_available(&self) -> Result<(), LLMError> {
        Ok(())
    }

    /// Local token estimate for budgeting before a request is made.
    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => bpe.encode_with_special_tokens(&text).len(),
            // Rough heuristic when the tokenizer tables are unavailable.
            Err(_) => text.len() / 4,
        }
    }

    /// USD cost of the given usage under this provider's pricing.
    fn calculate_cost(&self, usage: &TokenUsage) -> f64;

    /// Models this provider instance can serve.
    fn models(&self) -> Vec<String>;

    fn add_call_options(&mut self, options: CallOptions);
}

pub trait LLMClone {
    fn clone_box(&self) -> Box<dyn LLM>;
}

impl<T> LLMClone for T
where
    T: 'static + LLM + Clone,
{
    fn clone_box(&self) -> Box<dyn LLM> {
        Box::new(self.clone())
    }
}

impl std::fmt::Debug for dyn LLM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<dyn LLM models={:?}>", self.models())
    }
}

impl Clone for Box<dyn LLM> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl<L> From<L> for Box<dyn LLM>
where
    L: 'static + LLM,
{
    fn from(llm: L) -> Self {
        Box::new(llm)
    }
}

/// Cost per million tokens, prompt/completion split.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

impl ModelPricing {
    pub const fn new(prompt_per_million: f64, completion_per_million: f64) -> Self {
        Self {
            prompt_per_million,
            completion_per_million,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        f64::from(usage.prompt_tokens) * self.prompt_per_million / 1_000_000.0
            + f64::from(usage.completion_tokens) * self.completion_per_million / 1_000_000.0
    }
}
