use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed credentials file: {0}")]
    MalformedFile(#[from] serde_json::Error),

    #[error("No home directory available for the credentials file")]
    NoHomeDirectory,
}
