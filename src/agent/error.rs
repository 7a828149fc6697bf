use std::time::Duration;

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::llm::LLMError;
use crate::template::TemplateError;
use crate::tools::ToolError;
use crate::vectorstore::IndexError;
use crate::workflow::WorkflowError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Workflow error: {0}")]
    WorkflowError(WorkflowError),

    #[error("Template error: {0}")]
    TemplateError(#[from] TemplateError),

    #[error("LLM error: {0}")]
    LLMError(#[from] LLMError),

    #[error("Tool error: {0}")]
    ToolError(#[from] ToolError),

    #[error("Index error: {0}")]
    IndexError(#[from] IndexError),

    #[error("Credential error: {0}")]
    CredentialError(#[from] CredentialError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),
}

impl From<WorkflowError> for AgentError {
    fn from(error: WorkflowError) -> Self {
        // Budget and configuration failures keep their identity at the
        // agent boundary so exit codes stay faithful.
        match error {
            WorkflowError::BudgetExceeded(message) => AgentError::BudgetExceeded(message),
            WorkflowError::ConfigError(message) => AgentError::ConfigError(message),
            other => AgentError::WorkflowError(other),
        }
    }
}

impl AgentError {
    /// Process exit code contract: 0 success, 1 failure, 2 invalid
    /// configuration, 3 budget exceeded.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::ConfigError(_) | AgentError::TemplateError(_) => 2,
            AgentError::BudgetExceeded(_) => 3,
            _ => 1,
        }
    }
}
