//! Workflow steps, their outcomes, and the closure adapter.

use crate::workflow::context::WorkflowContext;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome reported by a step's `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub error_message: Option<String>,
}

impl StepOutcome {
    /// A successful outcome.
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    /// A failed outcome carrying a cause text.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// A named unit of workflow work with declared predecessors.
///
/// A step runs only after every predecessor completed successfully, and at
/// most once per workflow run. Steps flagged [`parallel_capable`] may run
/// concurrently with other ready steps of the same wave.
///
/// [`parallel_capable`]: WorkflowStep::parallel_capable
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// Unique name within the owning workflow.
    fn name(&self) -> &str;

    /// Names of steps that must succeed before this one runs.
    fn predecessors(&self) -> &[String] {
        &[]
    }

    /// Whether this step may run concurrently with other ready steps.
    fn parallel_capable(&self) -> bool {
        false
    }

    /// Executes the step against the shared context. Failures belong in the
    /// returned outcome; the token must be observed for prompt cancellation.
    async fn run(&self, context: &WorkflowContext, cancel: CancellationToken) -> StepOutcome;
}

type StepFuture = Pin<Box<dyn Future<Output = StepOutcome> + Send>>;
type StepFn = Box<dyn Fn(WorkflowContext, CancellationToken) -> StepFuture + Send + Sync>;

/// Adapts an async closure into a [`WorkflowStep`].
///
/// # Examples
///
/// ```
/// use conductor::{FnStep, StepOutcome};
///
/// let step = FnStep::new("compile", |_context, _cancel| async move {
///     StepOutcome::ok()
/// })
/// .after("restore")
/// .parallel();
/// # let _ = step;
/// ```
pub struct FnStep {
    name: String,
    predecessors: Vec<String>,
    parallel_capable: bool,
    run: StepFn,
}

impl FnStep {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WorkflowContext, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        Self {
            name: name.into(),
            predecessors: Vec::new(),
            parallel_capable: false,
            run: Box::new(move |context, cancel| Box::pin(f(context, cancel))),
        }
    }

    /// Declares a predecessor this step waits for.
    pub fn after(mut self, predecessor: impl Into<String>) -> Self {
        self.predecessors.push(predecessor.into());
        self
    }

    /// Marks the step as safe to run concurrently with ready siblings.
    pub fn parallel(mut self) -> Self {
        self.parallel_capable = true;
        self
    }
}

#[async_trait]
impl WorkflowStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn predecessors(&self) -> &[String] {
        &self.predecessors
    }

    fn parallel_capable(&self) -> bool {
        self.parallel_capable
    }

    async fn run(&self, context: &WorkflowContext, cancel: CancellationToken) -> StepOutcome {
        (self.run)(context.clone(), cancel).await
    }
}

/// A named DAG of steps. Step names must be unique and every declared
/// predecessor must name a step in the same workflow; the engine validates
/// both before running anything.
#[derive(Clone)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<Arc<dyn WorkflowStep>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step; declaration order is authoritative for sequential
    /// scheduling within a wave.
    pub fn add_step(mut self, step: impl WorkflowStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Appends an already-shared step.
    pub fn add_shared_step(mut self, step: Arc<dyn WorkflowStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
