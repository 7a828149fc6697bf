use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CallOptions, LLMError, LLM};
use crate::schemas::{DisplaySink, GenerateResult, Message, MessageType, TokenUsage};

/// Test double: pops scripted responses in order, then echoes the last
/// human message. Tracks call counts for retry assertions.
#[derive(Clone)]
pub(crate) struct ScriptedLLM {
    responses: Arc<Mutex<VecDeque<Result<GenerateResult, LLMError>>>>,
    delay: Duration,
    cost_per_call: f64,
    calls: Arc<AtomicUsize>,
}

impl ScriptedLLM {
    pub(crate) fn echo() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            delay: Duration::ZERO,
            cost_per_call: 0.0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_responses(
        responses: Vec<Result<GenerateResult, LLMError>>,
    ) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::echo()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self, messages: &[Message]) -> Result<GenerateResult, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(scripted) = self.responses.lock().expect("script lock").pop_front() {
            return scripted;
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.message_type == MessageType::Human)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(GenerateResult::new(
            format!("echo: {prompt}"),
            Some(TokenUsage::new(10, 5)),
        ))
    }
}

#[async_trait]
impl LLM for ScriptedLLM {
    async fn generate(&self, messages: Vec<Message>) -> Result<GenerateResult, LLMError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_response(&messages)
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<GenerateResult, LLMError> {
        let result = self.generate(messages).await?;
        for chunk in result.text.split_inclusive(' ') {
            sink.write(chunk).await?;
        }
        Ok(result)
    }

    fn calculate_cost(&self, _usage: &TokenUsage) -> f64 {
        self.cost_per_call
    }

    fn models(&self) -> Vec<String> {
        vec!["scripted".to_string()]
    }

    fn add_call_options(&mut self, _options: CallOptions) {}
}
