use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::AgentConfig;

/// A higher-level DAG whose nodes are agents.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationConfig {
    pub name: String,
    pub agents: Vec<OrchestrationNode>,
    /// Shared-state keys projected into the final result.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Global agent concurrency. Defaults to the number of logical CPUs.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationNode {
    pub id: String,
    pub config: AgentConfig,
    /// Which of the agent's workflows to run.
    pub workflow: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    /// Output name → dotted path into the agent's final context. Written to
    /// shared state as `<id>.<name>`.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}
