use std::time::Duration;

use thiserror::Error;

use crate::llm::LLMError;
use crate::template::TemplateError;
use crate::tools::ToolError;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Template error: {0}")]
    TemplateError(#[from] TemplateError),

    #[error("Tool error: {0}")]
    ToolError(#[from] ToolError),

    #[error("LLM error: {0}")]
    LLMError(#[from] LLMError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Dependency '{0}' failed")]
    DependencyFailed(String),

    #[error("Inner step '{step}' failed: {message}")]
    InnerStepFailed {
        step: String,
        kind_label: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl WorkflowError {
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::Timeout(_) | WorkflowError::IoError(_) => true,
            WorkflowError::ToolError(e) => e.is_retryable(),
            WorkflowError::LLMError(e) => e.is_transient(),
            // Inner steps retry at their own level.
            WorkflowError::ConfigError(_)
            | WorkflowError::TemplateError(_)
            | WorkflowError::Cancelled
            | WorkflowError::BudgetExceeded(_)
            | WorkflowError::DependencyFailed(_)
            | WorkflowError::InnerStepFailed { .. } => false,
        }
    }

    /// Stable kind label used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::ConfigError(_) => "config",
            WorkflowError::TemplateError(_) => "template",
            WorkflowError::ToolError(ToolError::SecurityDenied(_)) => "security_denied",
            WorkflowError::ToolError(_) => "tool",
            WorkflowError::LLMError(_) => "provider",
            WorkflowError::Timeout(_) => "timeout",
            WorkflowError::Cancelled => "cancelled",
            WorkflowError::BudgetExceeded(_) => "budget_exceeded",
            WorkflowError::DependencyFailed(_) => "dependency_failed",
            WorkflowError::InnerStepFailed { kind_label, .. } => kind_label,
            WorkflowError::IoError(_) => "io",
        }
    }
}
