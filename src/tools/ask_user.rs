use async_trait::async_trait;
use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{SecurityPolicy, Tool, ToolError};

const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Prompts on stdout and reads one line from stdin, optionally validating
/// it against a regex. Re-prompts up to `max_attempts` times.
pub struct AskUser {
    max_attempts: usize,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AskUserInput {
    pub prompt: String,
    /// Regex the trimmed answer must match.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AskUserOptions {
    max_attempts: Option<usize>,
}

impl Default for AskUser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl AskUser {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    pub fn from_options(options: &Value) -> Result<Self, ToolError> {
        let options: AskUserOptions = serde_json::from_value(options.clone())?;
        Ok(Self::new(options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)))
    }

    async fn read_validated<R>(
        &self,
        mut lines: tokio::io::Lines<R>,
        prompt: &str,
        pattern: Option<&regex::Regex>,
    ) -> Result<String, ToolError>
    where
        R: AsyncBufReadExt + Unpin,
    {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                log::warn!("answer failed validation, asking again ({attempt}/{})", self.max_attempts);
            }
            println!("{prompt}");

            let line = lines.next_line().await?.ok_or(ToolError::StreamClosed)?;
            let answer = line.trim();

            match pattern {
                Some(pattern) if !pattern.is_match(answer) => continue,
                _ => return Ok(answer.to_string()),
            }
        }

        Err(ToolError::ValidationFailed(self.max_attempts))
    }
}

#[async_trait]
impl Tool for AskUser {
    fn name(&self) -> String {
        "ask_user".into()
    }

    fn description(&self) -> String {
        "Asks the user a question and returns their answer".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(AskUserInput)
    }

    async fn call(&self, args: Value, _policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: AskUserInput = serde_json::from_value(args)?;

        let pattern = input
            .pattern
            .as_deref()
            .map(regex::Regex::new)
            .transpose()
            .map_err(|e| ToolError::ExecutionError(format!("invalid validation regex: {e}")))?;

        let lines = BufReader::new(tokio::io::stdin()).lines();
        self.read_validated(lines, &input.prompt, pattern.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncBufReadExt;

    use super::*;

    fn lines_from(input: &'static str) -> tokio::io::Lines<BufReader<&'static [u8]>> {
        BufReader::new(input.as_bytes()).lines()
    }

    #[tokio::test]
    async fn test_answer_is_trimmed() {
        let tool = AskUser::default();
        let answer = tool
            .read_validated(lines_from("  yes  \n"), "continue?", None)
            .await
            .unwrap();
        assert_eq!(answer, "yes");
    }

    #[tokio::test]
    async fn test_validation_retries_then_fails() {
        let tool = AskUser::new(2);
        let pattern = regex::Regex::new(r"^\d+$").unwrap();
        let err = tool
            .read_validated(lines_from("abc\ndef\n"), "number?", Some(&pattern))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ValidationFailed(2)));
    }

    #[tokio::test]
    async fn test_validation_accepts_later_answer() {
        let tool = AskUser::new(3);
        let pattern = regex::Regex::new(r"^\d+$").unwrap();
        let answer = tool
            .read_validated(lines_from("abc\n42\n"), "number?", Some(&pattern))
            .await
            .unwrap();
        assert_eq!(answer, "42");
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let tool = AskUser::default();
        let err = tool
            .read_validated(lines_from(""), "anyone?", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::StreamClosed));
    }
}
