use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }

    /// Folds any number of optional usages into one; `None` entries are ignored.
    pub fn merge_options<'a, I>(usages: I) -> Option<TokenUsage>
    where
        I: IntoIterator<Item = &'a Option<TokenUsage>>,
    {
        usages
            .into_iter()
            .flatten()
            .fold(None, |acc: Option<TokenUsage>, usage| match acc {
                Some(acc) => Some(acc.add(usage)),
                None => Some(usage.clone()),
            })
    }
}
