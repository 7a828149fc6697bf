use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work inside a workflow.
///
/// `kind` is flattened from the document's `type`/`config` pair, so a step
/// reads as `{ "name": ..., "type": "llm", "config": {...}, "depends_on":
/// [...] }` on the wire.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl StepConfig {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StepKind::Llm(_) => "llm",
            StepKind::Tool(_) => "tool",
            StepKind::Condition(_) => "condition",
            StepKind::Loop(_) => "loop",
            StepKind::Parallel(_) => "parallel",
            StepKind::LlmDisplay(_) => "llm_display",
        }
    }
}

/// Closed set of step kinds. Unknown tags fail deserialization before the
/// engine ever sees them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum StepKind {
    Llm(LlmStep),
    Tool(ToolStep),
    Condition(ConditionStep),
    Loop(LoopStep),
    Parallel(ParallelStep),
    LlmDisplay(LlmStep),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmStep {
    pub prompt: String,
    /// Overrides the agent-level system prompt when present.
    #[serde(default)]
    pub system: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolStep {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Presence/equality test on a dotted context path, routing between two
/// declared branches. The untaken branch's steps are skipped.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConditionStep {
    pub path: String,
    #[serde(default)]
    pub equals: Option<String>,
    #[serde(default)]
    pub then_steps: Vec<String>,
    #[serde(default)]
    pub else_steps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoopStep {
    /// Dotted context path to the collection to iterate.
    pub over: String,
    /// Name the current element is bound to inside the iteration scope.
    #[serde(default = "default_item_var")]
    pub item_var: String,
    pub steps: Vec<StepConfig>,
}

fn default_item_var() -> String {
    "item".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParallelStep {
    pub steps: Vec<StepConfig>,
}

/// Attempt budget and backoff base for one step.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_step_kind_tagging() {
        let step: StepConfig = serde_json::from_value(json!({
            "name": "check",
            "type": "condition",
            "config": { "path": "probe.status", "equals": "ok", "then_steps": ["deploy"], "else_steps": ["alert"] },
            "depends_on": ["probe"]
        }))
        .unwrap();

        assert_eq!(step.kind_name(), "condition");
        match step.kind {
            StepKind::Condition(cond) => {
                assert_eq!(cond.path, "probe.status");
                assert_eq!(cond.then_steps, vec!["deploy"]);
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_step_kind_is_rejected() {
        let result: Result<StepConfig, _> = serde_json::from_value(json!({
            "name": "x",
            "type": "teleport",
            "config": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_defaults() {
        let step: StepConfig = serde_json::from_value(json!({
            "name": "a",
            "type": "llm",
            "config": { "prompt": "hi" }
        }))
        .unwrap();
        assert_eq!(step.retry.max_attempts, 1);
        assert_eq!(step.retry.base_delay_ms, 100);
        assert!(!step.continue_on_error);
    }

    #[test]
    fn test_nested_loop_steps() {
        let step: StepConfig = serde_json::from_value(json!({
            "name": "per_file",
            "type": "loop",
            "config": {
                "over": "listing.files",
                "steps": [
                    { "name": "read", "type": "tool", "config": { "tool": "file_reader", "args": { "path": "{item}" } } }
                ]
            }
        }))
        .unwrap();

        match step.kind {
            StepKind::Loop(inner) => {
                assert_eq!(inner.item_var, "item");
                assert_eq!(inner.steps.len(), 1);
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }
}
