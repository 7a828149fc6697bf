use serde::{Deserialize, Serialize};

/// A declared input preloaded into the context before the DAG starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSourceConfig {
    /// Context key the loaded value is stored under.
    pub name: String,
    #[serde(flatten)]
    pub kind: DataSourceKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSourceKind {
    File {
        path: String,
    },
    Directory {
        path: String,
        #[serde(default = "default_pattern")]
        pattern: String,
    },
    Url {
        url: String,
        #[serde(default = "default_url_timeout")]
        timeout_secs: u64,
    },
    Git {
        path: String,
        #[serde(default)]
        diff: bool,
    },
    /// Opens a vector index at `path` and exposes it through the synthetic
    /// `semantic_search` tool.
    Embedding {
        path: String,
    },
}

fn default_pattern() -> String {
    "**/*".to_string()
}

fn default_url_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_kind_tagging() {
        let source: DataSourceConfig = serde_json::from_value(json!({
            "name": "repo",
            "kind": "git",
            "path": ".",
            "diff": true
        }))
        .unwrap();

        assert_eq!(source.name, "repo");
        assert!(matches!(source.kind, DataSourceKind::Git { diff: true, .. }));
    }

    #[test]
    fn test_directory_default_pattern() {
        let source: DataSourceConfig = serde_json::from_value(json!({
            "name": "src",
            "kind": "directory",
            "path": "./src"
        }))
        .unwrap();

        match source.kind {
            DataSourceKind::Directory { pattern, .. } => assert_eq!(pattern, "**/*"),
            other => panic!("wrong kind: {other:?}"),
        }
    }
}
