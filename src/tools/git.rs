use std::path::Path;

use async_trait::async_trait;
use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use super::{SecurityPolicy, Tool, ToolError};

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GitRepoInput {
    /// Path to the repository working tree.
    pub path: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GitCommitInput {
    pub path: String,
    pub message: String,
}

async fn run_git(repo: &Path, args: &[&str]) -> Result<String, ToolError> {
    if !repo.join(".git").exists() {
        return Err(ToolError::ExecutionError(format!(
            "{} is not a git repository",
            repo.display()
        )));
    }

    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .await?;

    if !output.status.success() {
        return Err(ToolError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `git diff` over the working tree.
#[derive(Default)]
pub struct GitDiff;

impl GitDiff {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for GitDiff {
    fn name(&self) -> String {
        "git_diff".into()
    }

    fn description(&self) -> String {
        "Shows uncommitted changes in a git repository".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(GitRepoInput)
    }

    async fn call(&self, args: Value, policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: GitRepoInput = serde_json::from_value(args)?;
        let repo = policy.check_path(Path::new(&input.path))?;
        run_git(&repo, &["diff"]).await
    }
}

/// `git status --porcelain`.
#[derive(Default)]
pub struct GitStatus;

impl GitStatus {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for GitStatus {
    fn name(&self) -> String {
        "git_status".into()
    }

    fn description(&self) -> String {
        "Lists changed files in a git repository".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(GitRepoInput)
    }

    async fn call(&self, args: Value, policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: GitRepoInput = serde_json::from_value(args)?;
        let repo = policy.check_path(Path::new(&input.path))?;
        run_git(&repo, &["status", "--porcelain"]).await
    }
}

/// Stages everything and commits with the given message.
#[derive(Default)]
pub struct GitCommit;

impl GitCommit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for GitCommit {
    fn name(&self) -> String {
        "git_commit".into()
    }

    fn description(&self) -> String {
        "Stages all changes and creates a commit".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(GitCommitInput)
    }

    async fn call(&self, args: Value, policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: GitCommitInput = serde_json::from_value(args)?;
        let repo = policy.check_path(Path::new(&input.path))?;

        run_git(&repo, &["add", "-A"]).await?;
        run_git(&repo, &["commit", "-m", &input.message]).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_missing_repo() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SecurityPolicy::for_workspace(dir.path());

        let err = GitStatus::new()
            .call(json!({ "path": dir.path().to_str().unwrap() }), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionError(_)));
    }

    #[tokio::test]
    async fn test_repo_path_outside_allowlist() {
        let policy = SecurityPolicy::default();
        let err = GitDiff::new()
            .call(json!({ "path": "/" }), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SecurityDenied(_)));
    }
}
