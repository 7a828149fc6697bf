use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

/// Process-scoped key/value store shared by every agent of one
/// orchestration run. Keys are scoped `<agent-id>.<output-name>`;
/// last-writer-wins per key.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner
            .write()
            .expect("shared state lock poisoned")
            .insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .read()
            .expect("shared state lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner
            .read()
            .expect("shared state lock poisoned")
            .clone()
    }

    /// Nested-object view of the store, suitable for injection under the
    /// `agents` context key: `writer.summary` becomes
    /// `{"writer": {"summary": ...}}`.
    pub fn injected(&self) -> Value {
        let mut root = Map::new();

        for (key, value) in self.snapshot() {
            let mut segments = key.split('.').peekable();
            let mut current = &mut root;

            while let Some(segment) = segments.next() {
                if segments.peek().is_none() {
                    current.insert(segment.to_string(), value.clone());
                } else {
                    let entry = current
                        .entry(segment.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        *entry = Value::Object(Map::new());
                    }
                    current = entry.as_object_mut().expect("just ensured object");
                }
            }
        }

        Value::Object(root)
    }
}
