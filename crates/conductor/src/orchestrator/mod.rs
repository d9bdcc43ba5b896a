//! Facade wiring the throttle, batch executor, and workflow engine together.

mod registry;

pub use registry::{FnTool, ToolHandler, ToolInvocation, ToolRegistry, ToolResult};

use crate::batch::{BatchExecutor, BatchOptions};
use crate::error::TaskError;
use crate::operation::{Operation, operation};
use crate::throttle::{Throttle, ThrottleMetrics};
use crate::workflow::{Workflow, WorkflowEngine};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Front door for services that dispatch named tools and workflows through
/// one process-wide concurrency budget.
///
/// The orchestrator owns a single [`Throttle`] wired into both its
/// [`BatchExecutor`] and its [`WorkflowEngine`]; its capacity is the single
/// knob for global concurrency.
pub struct Orchestrator {
    registry: ToolRegistry,
    throttle: Arc<Throttle>,
    batch: BatchExecutor,
    engine: WorkflowEngine,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Creates an orchestrator whose capacity is the host's available
    /// parallelism.
    pub fn new() -> Self {
        Self::with_capacity(crate::batch::default_parallelism())
            .expect("default capacity is positive")
    }

    /// Creates an orchestrator with an explicit concurrency capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self, TaskError> {
        let throttle = Arc::new(Throttle::new(capacity)?);
        Ok(Self {
            registry: ToolRegistry::new(),
            batch: BatchExecutor::with_throttle(Arc::clone(&throttle)),
            engine: WorkflowEngine::with_throttle(Arc::clone(&throttle)),
            throttle,
        })
    }

    /// The underlying registry, usable standalone.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Inserts or replaces the handler registered under `name`.
    pub fn register_tool(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.registry.register(name, handler);
    }

    /// Registers an async closure as a tool handler.
    pub fn register_tool_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        self.registry.register_fn(name, f);
    }

    /// Removes the handler for `name`, reporting whether one was present.
    pub fn unregister_tool(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    /// Sorted names of all registered tools.
    pub fn registered_tools(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Replaces the global concurrency limit observed by new acquisitions.
    /// Work already in flight is unaffected.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), TaskError> {
        self.throttle.set_capacity(capacity)
    }

    /// Snapshot of the shared throttle's state.
    pub fn metrics(&self) -> ThrottleMetrics {
        self.throttle.metrics()
    }

    /// The shared throttle, for callers that run their own operations under
    /// the same capacity.
    pub fn throttle(&self) -> Arc<Throttle> {
        Arc::clone(&self.throttle)
    }

    /// Dispatches every invocation concurrently and returns one result per
    /// input, in input order.
    ///
    /// Unregistered names yield an in-line failure [`ToolResult`] rather than
    /// an error, so the returned list always matches the input length.
    /// Per-tool failures never raise; only outer cancellation does.
    pub async fn dispatch_parallel(
        &self,
        invocations: Vec<ToolInvocation>,
        cancel: CancellationToken,
    ) -> Result<Vec<ToolResult>, TaskError> {
        let total = invocations.len();
        debug!(total, "dispatching tools in parallel");

        let ops: Vec<Operation<ToolResult>> = invocations
            .into_iter()
            .map(|invocation| {
                // Handler lookup happens here, so a dispatch racing a
                // registration observes the pre- or post-state per name.
                let handler = self.registry.get(&invocation.name);
                operation(move |token| async move {
                    match handler {
                        Some(handler) => Ok(handler.call(&invocation.args, token).await),
                        None => Ok(ToolResult::failure(format!(
                            "unknown tool '{}'",
                            invocation.name
                        ))),
                    }
                })
            })
            .collect();

        // The shared throttle is the concurrency knob here; the batch gate
        // admits the whole request.
        let options = BatchOptions::new().with_max_parallelism(total.max(1));
        let result = self.batch.run(ops, options, None, cancel).await?;
        Ok(result.successes)
    }

    /// Runs a single registered tool through the shared throttle.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &str,
        cancel: CancellationToken,
    ) -> Result<ToolResult, TaskError> {
        let Some(handler) = self.registry.get(name) else {
            return Ok(ToolResult::failure(format!("unknown tool '{name}'")));
        };
        let args = args.to_string();
        self.throttle
            .acquire_and_run(
                move |token| async move { Ok(handler.call(&args, token).await) },
                cancel,
            )
            .await
    }

    /// Runs `workflow` through the engine and summarizes the outcome.
    ///
    /// Step failures yield a failure [`ToolResult`] naming the failed
    /// step(s); validation and cancellation errors propagate as `Err`.
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        cancel: CancellationToken,
    ) -> Result<ToolResult, TaskError> {
        let total = workflow.steps.len();
        let result = self.engine.run(workflow, None, cancel).await?;
        let summary = if result.success {
            info!(workflow = %workflow.name, steps = total, "workflow dispatch completed");
            ToolResult::success(format!(
                "{}/{} steps succeeded in {:?}",
                result.succeeded_steps(),
                total,
                result.duration,
            ))
        } else {
            ToolResult::failure(format!(
                "workflow '{}' failed at step(s): {}",
                workflow.name,
                result.failed_steps().join(", "),
            ))
        };
        Ok(summary
            .with_metadata("workflow", json!(workflow.name))
            .with_metadata("steps_completed", json!(result.steps.len())))
    }
}
