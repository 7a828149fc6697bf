use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::config::{DataSourceConfig, DataSourceKind};
use crate::vectorstore::VectorIndex;

use super::AgentError;

/// What a data-source declaration loads before the DAG starts: either a
/// plain context value, or a live vector-index handle exposed through the
/// `semantic_search` tool.
#[derive(Debug)]
pub enum LoadedSource {
    Value(Value),
    Embedding(Arc<RwLock<VectorIndex>>),
}

pub async fn load(source: &DataSourceConfig) -> Result<LoadedSource, AgentError> {
    let loaded = match &source.kind {
        DataSourceKind::File { path } => {
            LoadedSource::Value(Value::String(tokio::fs::read_to_string(path).await?))
        }
        DataSourceKind::Directory { path, pattern } => {
            LoadedSource::Value(load_directory(Path::new(path), pattern)?)
        }
        DataSourceKind::Url { url, timeout_secs } => {
            let response = reqwest::Client::new()
                .get(url)
                .timeout(Duration::from_secs(*timeout_secs))
                .send()
                .await?;
            LoadedSource::Value(json!({
                "status": response.status().as_u16(),
                "body": response.text().await?,
            }))
        }
        DataSourceKind::Git { path, diff } => LoadedSource::Value(load_git(path, *diff).await?),
        DataSourceKind::Embedding { path } => {
            let index = VectorIndex::open(path)?;
            log::info!(
                "opened embedding index at {path} with {} records",
                index.count()
            );
            LoadedSource::Embedding(Arc::new(RwLock::new(index)))
        }
    };

    Ok(loaded)
}

/// Reads every file under `dir` matching `pattern` into a map of relative
/// path → content. Unreadable files are skipped with a warning.
fn load_directory(dir: &Path, pattern: &str) -> Result<Value, AgentError> {
    let full_pattern = dir.join(pattern);
    let full_pattern = full_pattern.to_string_lossy();

    let mut contents = Map::new();
    let entries = glob::glob(&full_pattern)
        .map_err(|e| AgentError::ConfigError(format!("invalid glob pattern: {e}")))?;

    for entry in entries.flatten() {
        if !entry.is_file() {
            continue;
        }
        let key = entry
            .strip_prefix(dir)
            .unwrap_or(&entry)
            .to_string_lossy()
            .into_owned();
        match std::fs::read_to_string(&entry) {
            Ok(text) => {
                contents.insert(key, Value::String(text));
            }
            Err(e) => log::warn!("skipping unreadable file {}: {e}", entry.display()),
        }
    }

    Ok(Value::Object(contents))
}

async fn load_git(repo: &str, include_diff: bool) -> Result<Value, AgentError> {
    let head_path = Path::new(repo).join(".git").join("HEAD");
    let head = tokio::fs::read_to_string(&head_path)
        .await
        .map_err(|e| AgentError::ConfigError(format!("{repo} is not a git repository: {e}")))?;

    let mut value = Map::new();
    value.insert("head".to_string(), Value::String(head.trim().to_string()));

    if include_diff {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(repo)
            .arg("diff")
            .output()
            .await?;
        value.insert(
            "diff".to_string(),
            Value::String(String::from_utf8_lossy(&output.stdout).into_owned()),
        );
    }

    Ok(Value::Object(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, kind: DataSourceKind) -> DataSourceConfig {
        DataSourceConfig {
            name: name.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "remember this").unwrap();

        let loaded = load(&source(
            "notes",
            DataSourceKind::File {
                path: path.to_string_lossy().into_owned(),
            },
        ))
        .await
        .unwrap();

        match loaded {
            LoadedSource::Value(value) => assert_eq!(value, json!("remember this")),
            LoadedSource::Embedding(_) => panic!("wrong source kind"),
        }
    }

    #[tokio::test]
    async fn test_directory_source_with_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();

        let loaded = load(&source(
            "docs",
            DataSourceKind::Directory {
                path: dir.path().to_string_lossy().into_owned(),
                pattern: "*.md".to_string(),
            },
        ))
        .await
        .unwrap();

        match loaded {
            LoadedSource::Value(Value::Object(map)) => {
                assert_eq!(map.len(), 1);
                assert_eq!(map["a.md"], json!("alpha"));
            }
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_url_source() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/feed")
            .with_status(200)
            .with_body("contents")
            .create_async()
            .await;

        let loaded = load(&source(
            "feed",
            DataSourceKind::Url {
                url: format!("{}/feed", server.url()),
                timeout_secs: 5,
            },
        ))
        .await
        .unwrap();

        match loaded {
            LoadedSource::Value(value) => {
                assert_eq!(value["status"], 200);
                assert_eq!(value["body"], "contents");
            }
            LoadedSource::Embedding(_) => panic!("wrong source kind"),
        }
    }

    #[tokio::test]
    async fn test_git_source_requires_repository() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&source(
            "repo",
            DataSourceKind::Git {
                path: dir.path().to_string_lossy().into_owned(),
                diff: false,
            },
        ))
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_embedding_source_opens_index() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&source(
            "index",
            DataSourceKind::Embedding {
                path: dir.path().to_string_lossy().into_owned(),
            },
        ))
        .await
        .unwrap();

        match loaded {
            LoadedSource::Embedding(index) => assert_eq!(index.read().await.count(), 0),
            LoadedSource::Value(_) => panic!("wrong source kind"),
        }
    }
}
