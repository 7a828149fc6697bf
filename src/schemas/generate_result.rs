use std::fmt;

use indoc::writedoc;

use super::TokenUsage;

/// The outcome of one LLM generation: the produced text plus the token usage
/// the provider reported (if any).
#[derive(Debug, Clone, Default)]
pub struct GenerateResult {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl GenerateResult {
    pub fn new(text: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

impl fmt::Display for GenerateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)?;

        if let Some(usage) = &self.usage {
            writedoc!(
                f,
                "

                Token Usage:
                - Prompt Tokens: {}
                - Completion Tokens: {}
                - Total Tokens: {}",
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens
            )?;
        }

        Ok(())
    }
}
