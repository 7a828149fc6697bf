use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Input parsing error: {0}")]
    InputParseError(#[from] serde_json::Error),

    #[error("Security denied: {0}")]
    SecurityDenied(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Command `{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("File too large: {path} is {size} bytes, limit is {limit}")]
    FileTooLarge {
        path: String,
        size: u64,
        limit: u64,
    },

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Input stream closed")]
    StreamClosed,

    #[error("Input failed validation after {0} attempts")]
    ValidationFailed(usize),

    #[error("Error while running tool: {0}")]
    ExecutionError(String),
}

impl ToolError {
    /// Whether a retry could plausibly change the outcome. Security denials
    /// and malformed inputs are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::IoError(_)
            | ToolError::RequestError(_)
            | ToolError::HttpStatus(_)
            | ToolError::CommandFailed { .. }
            | ToolError::ExecutionError(_) => true,
            ToolError::ToolNotFound(_)
            | ToolError::InputParseError(_)
            | ToolError::SecurityDenied(_)
            | ToolError::InvalidUrl(_)
            | ToolError::FileTooLarge { .. }
            | ToolError::StreamClosed
            | ToolError::ValidationFailed(_) => false,
        }
    }
}
