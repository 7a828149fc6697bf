use std::fmt::Write as _;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde_json::Value;

use crate::schemas::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// What one step did: terminal status, output or error, timing, and the
/// consumption attributed to it.
#[derive(Debug)]
pub struct StepResult {
    pub name: String,
    pub kind: &'static str,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub usage: Option<TokenUsage>,
    pub cost: f64,
    pub attempts: u32,
}

impl StepResult {
    pub fn skipped(name: impl Into<String>, kind: &'static str, reason: &'static str) -> Self {
        Self {
            name: name.into(),
            kind,
            status: StepStatus::Skipped,
            output: None,
            error: None,
            error_kind: Some(reason),
            started_at: SystemTime::now(),
            duration: Duration::ZERO,
            usage: None,
            cost: 0.0,
            attempts: 0,
        }
    }
}

/// Per-step results of one workflow run, in specification order.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub results: Vec<StepResult>,
}

impl WorkflowReport {
    pub fn get(&self, name: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|r| r.status != StepStatus::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        TokenUsage::merge_options(self.results.iter().map(|r| &r.usage))
    }

    pub fn cost(&self) -> f64 {
        self.results.iter().map(|r| r.cost).sum()
    }

    /// Human-readable failure summary: step, kind, attempts, error kind and
    /// message per failed step.
    pub fn render_failures(&self) -> String {
        let mut out = String::new();
        for failure in self.failures() {
            let _ = writeln!(
                out,
                "step '{}' ({}) failed after {} attempt(s): [{}] {}",
                failure.name,
                failure.kind,
                failure.attempts,
                failure.error_kind.unwrap_or("unknown"),
                failure.error.as_deref().unwrap_or("no message"),
            );
        }
        out
    }
}
