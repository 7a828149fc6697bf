use thiserror::Error;

use crate::embedding::EmbedderError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Embedder error: {0}")]
    EmbedderError(#[from] EmbedderError),

    #[error("Vector dimension mismatch: index holds {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Zero-magnitude vector rejected")]
    ZeroMagnitude,

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),
}
