//! `conductor` - a concurrent task orchestration core for developer tooling.
//!
//! Services such as test runners, build drivers, and code-intelligence
//! batches spend most of their time supervising I/O-bound work. This crate
//! provides the concurrency substrate they share: getting cancellation,
//! partial-failure semantics, dependency scheduling, ordered aggregation,
//! timeout composition, and live capacity resizing right once, so the
//! services above stay simple shells.
//!
//! Three coordinators compose, leaves first:
//!
//! - [`Throttle`] bounds how many operations execute concurrently, exposes
//!   throughput metrics, and supports live capacity changes.
//! - [`BatchExecutor`] fans a finite ordered sequence of independent
//!   operations out with bounded parallelism, per-operation timeouts, error
//!   aggregation, and progress reporting; results come back ordered by input
//!   index.
//! - [`WorkflowEngine`] schedules a DAG of named steps in topological waves,
//!   running parallel-capable ready steps concurrently and threading a shared
//!   key/value context between steps.
//!
//! The [`Orchestrator`] facade owns one throttle shared by the other two and
//! adds a registry of named tools, giving callers a single entry point for
//! parallel tool dispatch and workflow execution under one process-wide
//! concurrency budget.
//!
//! # Example
//!
//! ```
//! use conductor::{Orchestrator, ToolInvocation, ToolResult};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), conductor::TaskError> {
//! let orchestrator = Orchestrator::with_capacity(4)?;
//! orchestrator.register_tool_fn("echo", |args, _cancel| async move {
//!     ToolResult::success(args)
//! });
//!
//! let results = orchestrator
//!     .dispatch_parallel(
//!         vec![
//!             ToolInvocation::new("echo", "one"),
//!             ToolInvocation::new("echo", "two"),
//!         ],
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! assert_eq!(results.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod error;
pub mod operation;
pub mod orchestrator;
pub mod throttle;
pub mod workflow;

pub use batch::{
    BatchExecutor, BatchOptions, BatchProgress, BatchProgressSink, BatchResult, ExecutionError,
};
pub use error::TaskError;
pub use operation::{Operation, OperationFuture, operation};
pub use orchestrator::{
    FnTool, Orchestrator, ToolHandler, ToolInvocation, ToolRegistry, ToolResult,
};
pub use throttle::{Throttle, ThrottleMetrics};
pub use workflow::{
    FnStep, StepExecutionResult, StepOutcome, Workflow, WorkflowContext, WorkflowEngine,
    WorkflowProgress, WorkflowProgressSink, WorkflowResult, WorkflowStep,
};
