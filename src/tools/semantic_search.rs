use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::embedding::Embedder;
use crate::vectorstore::VectorIndex;

use super::{SecurityPolicy, Tool, ToolError};

/// Synthetic tool registered when an agent declares an `embedding` data
/// source. Embeds the query and runs a cosine search over the attached
/// index.
pub struct SemanticSearch {
    index: Arc<RwLock<VectorIndex>>,
    embedder: Arc<dyn Embedder>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SemanticSearchInput {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub min_similarity: f64,
}

fn default_k() -> usize {
    4
}

impl SemanticSearch {
    pub fn new(index: Arc<RwLock<VectorIndex>>, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }
}

#[async_trait]
impl Tool for SemanticSearch {
    fn name(&self) -> String {
        "semantic_search".into()
    }

    fn description(&self) -> String {
        "Searches the indexed files for content similar to the query".into()
    }

    fn parameters(&self) -> RootSchema {
        schema_for!(SemanticSearchInput)
    }

    async fn call(&self, args: Value, _policy: &SecurityPolicy) -> Result<String, ToolError> {
        let input: SemanticSearchInput = serde_json::from_value(args)?;

        let query_vector = self
            .embedder
            .embed_query(&input.query)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        let index = self.index.read().await;
        let hits = index
            .search(&query_vector, input.k, input.min_similarity)
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        let results: Vec<Value> = hits
            .into_iter()
            .map(|(record, score)| {
                json!({
                    "id": record.id,
                    "source": record.source,
                    "content": record.content,
                    "score": score,
                })
            })
            .collect();

        Ok(Value::Array(results).to_string())
    }
}
