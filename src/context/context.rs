use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

/// The mutable mapping from step name to step output, shared by every task
/// of one workflow run.
///
/// Reads take a snapshot under the lock and never observe a partially
/// written entry. Writes go through [`ExecutionContext::insert`], which is
/// append-only for the duration of a run: once a step has completed, its
/// entry is stable.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    /// Stores a step output. Overwriting an existing entry indicates a
    /// scheduler bug and is logged, not honored.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut inner = self.inner.lock().expect("context lock poisoned");
        if inner.contains_key(&key) {
            log::error!("refusing to overwrite context entry '{key}'");
            return;
        }
        inner.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .expect("context lock poisoned")
            .get(key)
            .cloned()
    }

    /// A point-in-time copy of the whole context. Template resolution works
    /// against snapshots so running steps never block each other on reads.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.lock().expect("context lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("context lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
