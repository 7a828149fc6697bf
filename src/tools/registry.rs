use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{
    AskUser, FileReader, FileWriter, GitCommit, GitDiff, GitStatus, SecurityPolicy, ShellCommand,
    Tool, ToolError, WebFetch,
};

/// Owned collection of tools for one agent. Built from the configuration's
/// tool enablement set; no process-wide registry exists.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiates the built-in tools named in `enabled`, passing each its
    /// per-tool options object. Unknown identifiers are rejected so typos
    /// fail at startup, not mid-run.
    pub fn from_enabled(enabled: &HashMap<String, Value>) -> Result<Self, ToolError> {
        let mut registry = Self::new();

        for (id, options) in enabled {
            // semantic_search is synthetic; it is attached when an
            // embedding data source is loaded.
            if id == "semantic_search" {
                continue;
            }
            let tool = builtin(id, options)?;
            registry.register(tool);
        }

        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn invoke(
        &self,
        id: &str,
        args: Value,
        policy: &SecurityPolicy,
    ) -> Result<String, ToolError> {
        let tool = self
            .get(id)
            .ok_or_else(|| ToolError::ToolNotFound(id.to_string()))?;

        log::debug!("invoking tool '{id}'");
        tool.call(args, policy).await
    }
}

fn builtin(id: &str, options: &Value) -> Result<Arc<dyn Tool>, ToolError> {
    let tool: Arc<dyn Tool> = match id {
        "shell_command" => Arc::new(ShellCommand::new()),
        "file_reader" => Arc::new(FileReader::new()),
        "file_writer" => Arc::new(FileWriter::new()),
        "web_fetch" => Arc::new(WebFetch::from_options(options)?),
        "git_diff" => Arc::new(GitDiff::new()),
        "git_status" => Arc::new(GitStatus::new()),
        "git_commit" => Arc::new(GitCommit::new()),
        "ask_user" => Arc::new(AskUser::from_options(options)?),
        other => return Err(ToolError::ToolNotFound(other.to_string())),
    };
    Ok(tool)
}
