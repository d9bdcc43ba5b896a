//! Shared key/value context threaded through the steps of a workflow run.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutable string-to-JSON mapping shared by the steps of one workflow run.
///
/// Cloning is cheap and shares the underlying map. Steps in the same parallel
/// wave may read and write concurrently; writers to the same key get
/// last-writer-wins and values are never torn. Parallel peers are expected
/// not to mutate the same key.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    values: Arc<Mutex<HashMap<String, JsonValue>>>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub async fn insert(&self, key: impl Into<String>, value: JsonValue) {
        self.values.lock().await.insert(key.into(), value);
    }

    /// Returns a clone of the value under `key`, if present.
    pub async fn get(&self, key: &str) -> Option<JsonValue> {
        self.values.lock().await.get(key).cloned()
    }

    /// Removes and returns the value under `key`, if present.
    pub async fn remove(&self, key: &str) -> Option<JsonValue> {
        self.values.lock().await.remove(key)
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.values.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.values.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.lock().await.is_empty()
    }

    /// Point-in-time copy of the whole map.
    pub async fn snapshot(&self) -> HashMap<String, JsonValue> {
        self.values.lock().await.clone()
    }
}
