//! Dependency-aware workflow scheduling over a shared context.

mod context;
mod engine;
mod step;

pub use context::WorkflowContext;
pub use engine::{
    StepExecutionResult, WorkflowEngine, WorkflowProgress, WorkflowProgressSink, WorkflowResult,
};
pub use step::{FnStep, StepOutcome, Workflow, WorkflowStep};
