use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
