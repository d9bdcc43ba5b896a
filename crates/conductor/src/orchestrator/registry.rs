//! Named tool handlers and the registry the facade dispatches through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, JsonValue>,
}

impl ToolResult {
    /// A successful result carrying `content`.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: Some(content.into()),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// A failed result carrying `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// One entry in a parallel dispatch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Case-sensitive registered tool name.
    pub name: String,
    /// Opaque argument payload; the core never parses it.
    pub args: String,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
        }
    }
}

/// A named handler callable through the orchestrator.
///
/// `args` is an opaque string, typically a serialized payload the handler
/// parses itself. Handlers must observe `cancel` and release external
/// resources (subprocesses, file handles) when it fires.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &str, cancel: CancellationToken) -> ToolResult;
}

type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
type ToolFn = Box<dyn Fn(String, CancellationToken) -> ToolFuture + Send + Sync>;

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnTool {
    f: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self {
            f: Box::new(move |args, cancel| Box::pin(f(args, cancel))),
        }
    }
}

#[async_trait]
impl ToolHandler for FnTool {
    async fn call(&self, args: &str, cancel: CancellationToken) -> ToolResult {
        (self.f)(args.to_string(), cancel).await
    }
}

/// Concurrent name-to-handler mapping. Cloning shares the underlying table.
///
/// Registration and removal are safe against concurrent dispatch; a dispatch
/// racing a mutation observes the pre- or post-state for that name, never an
/// inconsistent handler.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn ToolHandler>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the handler for `name`.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(name.into(), handler);
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        self.register(name, Arc::new(FnTool::new(f)));
    }

    /// Removes the handler for `name`, reporting whether one was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Returns the handler registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Registered names, sorted for stable listings.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("tool registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register_fn("echo", |args, _cancel| async move {
            ToolResult::success(args)
        });
        registry
    }

    #[test]
    fn register_then_unregister_restores_prior_state() {
        let registry = echo_registry();
        assert_eq!(registry.names(), ["echo"]);
        assert!(registry.unregister("echo"));
        assert!(registry.is_empty());
        assert!(!registry.unregister("echo"));
    }

    #[test]
    fn names_are_sorted() {
        let registry = echo_registry();
        registry.register_fn("build", |_args, _cancel| async move {
            ToolResult::success("ok")
        });
        assert_eq!(registry.names(), ["build", "echo"]);
    }

    #[test]
    fn registration_replaces_the_previous_handler() {
        let registry = echo_registry();
        registry.register_fn("echo", |_args, _cancel| async move {
            ToolResult::failure("replaced")
        });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clones_share_the_table() {
        let registry = echo_registry();
        let alias = registry.clone();
        assert!(alias.get("echo").is_some());
        alias.unregister("echo");
        assert!(registry.get("echo").is_none());
    }

    #[tokio::test]
    async fn handler_receives_the_raw_args() {
        let registry = echo_registry();
        let handler = registry.get("echo").unwrap();
        let result = handler.call("{\"x\":1}", CancellationToken::new()).await;
        assert!(result.ok);
        assert_eq!(result.content.as_deref(), Some("{\"x\":1}"));
    }

    #[test]
    fn tool_result_metadata_round_trips_through_json() {
        let result = ToolResult::success("done").with_metadata("count", serde_json::json!(3));
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: ToolResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, result);
    }
}
