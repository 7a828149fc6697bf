use async_trait::async_trait;
use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use super::{SecurityPolicy, Tool, ToolError};

/// Runs one allowlisted command without a shell. The command string is
/// whitespace-split; the first token must be on the policy allowlist.
#[derive(Default)]
pub struct ShellCommand;

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ShellCommandInput {
    /// The command line to execute, e.g. `ls -la src`.
    pub command: String,
    /// Working directory, checked against the allowed path prefixes.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ShellCommand {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ShellCommand {
    fn name(&self) -> String {
        "shell_command".into()
    }

    fn description(&self) -> String {
        "Runs an allowlisted command and returns its stdout and stderr".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(ShellCommandInput)
    }

    async fn call(&self, args: Value, policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: ShellCommandInput = serde_json::from_value(args)?;

        policy.check_command(&input.command)?;

        let mut tokens = input.command.split_whitespace();
        let program = tokens.next().expect("checked non-empty");
        let mut command = Command::new(program);
        command.args(tokens);

        if let Some(cwd) = &input.cwd {
            let cwd = policy.check_path(std::path::Path::new(cwd))?;
            command.current_dir(cwd);
        }

        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(ToolError::CommandFailed {
                command: input.command,
                code: output.status.code(),
                stderr: stderr.into_owned(),
            });
        }

        let mut result = stdout.into_owned();
        if !stderr.is_empty() {
            result.push_str(&stderr);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn echo_policy() -> SecurityPolicy {
        SecurityPolicy::default().allow_command("echo")
    }

    #[tokio::test]
    async fn test_allowlisted_command_runs() {
        let tool = ShellCommand::new();
        let out = tool
            .call(json!({ "command": "echo hello" }), &echo_policy())
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_denied_command_never_runs() {
        let tool = ShellCommand::new();
        let err = tool
            .call(json!({ "command": "touch /tmp/should-not-exist" }), &echo_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SecurityDenied(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let policy = SecurityPolicy::default().allow_command("false");
        let tool = ShellCommand::new();
        let err = tool
            .call(json!({ "command": "false" }), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CommandFailed { .. }));
    }
}
