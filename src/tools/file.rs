use std::path::Path;

use async_trait::async_trait;
use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use super::{SecurityPolicy, Tool, ToolError};

/// Reads a file as UTF-8 text, bounded by the policy's size limit.
#[derive(Default)]
pub struct FileReader;

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileReaderInput {
    pub path: String,
}

impl FileReader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for FileReader {
    fn name(&self) -> String {
        "file_reader".into()
    }

    fn description(&self) -> String {
        "Reads a text file from one of the allowed path prefixes".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(FileReaderInput)
    }

    async fn call(&self, args: Value, policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: FileReaderInput = serde_json::from_value(args)?;
        let path = policy.check_path(Path::new(&input.path))?;

        let metadata = tokio::fs::metadata(&path).await?;
        policy.check_file_size(&path, metadata.len())?;

        Ok(tokio::fs::read_to_string(&path).await?)
    }
}

/// Writes text to a file, creating parent directories. Returns the number
/// of bytes written.
#[derive(Default)]
pub struct FileWriter;

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileWriterInput {
    pub path: String,
    pub content: String,
}

impl FileWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for FileWriter {
    fn name(&self) -> String {
        "file_writer".into()
    }

    fn description(&self) -> String {
        "Writes text to a file under one of the allowed path prefixes".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(FileWriterInput)
    }

    async fn call(&self, args: Value, policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: FileWriterInput = serde_json::from_value(args)?;
        let path = policy.check_path(Path::new(&input.path))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, input.content.as_bytes()).await?;

        Ok(input.content.len().to_string())
    }
}
