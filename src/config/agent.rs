use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::SecurityPolicy;

use super::{DataSourceConfig, StepConfig};

/// One agent as described by the configuration document. Produced by the
/// configuration loader, never mutated during a run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub agent: AgentIdentity,
    #[serde(default)]
    pub limits: Limits,
    pub llm: LlmBinding,
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
    #[serde(default)]
    pub tools: HashMap<String, Value>,
    #[serde(default)]
    pub security: SecurityPolicy,
    pub workflows: HashMap<String, WorkflowConfig>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl AgentConfig {
    pub fn workflow(&self, name: &str) -> Option<&WorkflowConfig> {
        self.workflows.get(name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentIdentity {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
}

/// Hard and soft ceilings for one agent run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    /// Cap on dispatched steps per run, loop iterations included.
    pub max_iterations: Option<usize>,
    /// Wall-clock budget for the whole run, in seconds.
    pub timeout_secs: Option<u64>,
    /// Cost ceiling in USD, accumulated from provider metadata.
    pub max_cost: Option<f64>,
    /// Token ceiling, accumulated from provider metadata.
    pub max_tokens: Option<u64>,
    /// Fraction of a budget at which a warning is emitted.
    pub warn_threshold: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: Some(100),
            timeout_secs: None,
            max_cost: None,
            max_tokens: None,
            warn_threshold: 0.8,
        }
    }
}

/// Which provider and model the agent talks to, and how.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmBinding {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    pub steps: Vec<StepConfig>,
}
