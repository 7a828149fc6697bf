use std::time::Duration;

use thiserror::Error;

use crate::agent::AgentError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Agent '{id}' failed: {source}")]
    AgentError {
        id: String,
        #[source]
        source: AgentError,
    },

    #[error("Orchestration timed out after {0:?}")]
    Timeout(Duration),
}

impl OrchestratorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::ConfigError(_) => 2,
            OrchestratorError::AgentError { source, .. } => source.exit_code(),
            OrchestratorError::Timeout(_) => 1,
        }
    }
}
