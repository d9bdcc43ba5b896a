//! Wave-based scheduler for dependency-declared steps.

use crate::error::TaskError;
use crate::throttle::Throttle;
use crate::workflow::context::WorkflowContext;
use crate::workflow::step::{Workflow, WorkflowStep};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Result of one step invocation.
#[derive(Debug, Clone, Serialize)]
pub struct StepExecutionResult {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Outcome of a whole workflow run.
///
/// `steps` is ordered by completion time within parallel waves and by
/// declaration order within sequential waves, not by declaration over the
/// whole workflow.
#[derive(Debug, Serialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub steps: Vec<StepExecutionResult>,
    pub final_context: HashMap<String, JsonValue>,
    pub duration: Duration,
}

impl WorkflowResult {
    /// Number of steps that completed successfully.
    pub fn succeeded_steps(&self) -> usize {
        self.steps.iter().filter(|step| step.success).count()
    }

    /// Names of steps that completed with a failure.
    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| !step.success)
            .map(|step| step.name.as_str())
            .collect()
    }
}

/// Progress snapshot for a workflow run. `current_step` carries the step name
/// on start events and is cleared on completion events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowProgress {
    pub total: usize,
    pub completed: usize,
    pub current_step: Option<String>,
}

/// Caller-supplied progress sink for workflow runs.
pub type WorkflowProgressSink = Arc<dyn Fn(WorkflowProgress) + Send + Sync>;

/// Schedules a workflow's steps in topological waves.
///
/// Each wave is the set of steps whose predecessors have all succeeded.
/// Within a wave, steps flagged parallel-capable run concurrently when at
/// least one other step is ready; everything else runs one at a time in
/// declaration order.
#[derive(Default, Clone)]
pub struct WorkflowEngine {
    throttle: Option<Arc<Throttle>>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self { throttle: None }
    }

    /// Routes every step invocation through `throttle`, so workflow steps
    /// compete for the same process-wide capacity as other operations.
    pub fn with_throttle(throttle: Arc<Throttle>) -> Self {
        Self {
            throttle: Some(throttle),
        }
    }

    /// Runs `workflow` against a fresh context.
    pub async fn run(
        &self,
        workflow: &Workflow,
        progress: Option<WorkflowProgressSink>,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, TaskError> {
        self.run_with_context(workflow, WorkflowContext::new(), progress, cancel)
            .await
    }

    /// Runs `workflow` against a caller-seeded context.
    ///
    /// Validation failures (duplicate step names, predecessors naming missing
    /// steps) surface as [`TaskError::InvalidArgument`] before any step runs.
    /// A step failure terminates the workflow and yields a result with
    /// `success == false`; outer cancellation propagates as
    /// [`TaskError::Cancelled`] without a result.
    pub async fn run_with_context(
        &self,
        workflow: &Workflow,
        context: WorkflowContext,
        progress: Option<WorkflowProgressSink>,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, TaskError> {
        let span = info_span!(
            "workflow_run",
            workflow = %workflow.name,
            total_steps = workflow.steps.len(),
        );
        self.run_inner(workflow, context, progress, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        workflow: &Workflow,
        context: WorkflowContext,
        progress: Option<WorkflowProgressSink>,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, TaskError> {
        validate(workflow)?;

        let start = Instant::now();
        let total = workflow.steps.len();
        info!(workflow = %workflow.name, steps = total, "workflow starting");

        let mut executed: HashSet<String> = HashSet::with_capacity(total);
        let mut results: Vec<StepExecutionResult> = Vec::with_capacity(total);
        let mut completed = 0usize;
        let mut wave_number = 0usize;

        while executed.len() < total {
            let ready: Vec<Arc<dyn WorkflowStep>> = workflow
                .steps
                .iter()
                .filter(|step| !executed.contains(step.name()))
                .filter(|step| {
                    step.predecessors()
                        .iter()
                        .all(|pred| executed.contains(pred))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                return Err(TaskError::InvariantViolation(format!(
                    "workflow '{}' has no runnable step with {} remaining; dependency cycle",
                    workflow.name,
                    total - executed.len(),
                )));
            }

            wave_number += 1;
            // A step declared parallel-capable only runs in parallel when at
            // least one other step is ready alongside it.
            let parallel_eligible = ready.len() > 1;
            let (parallel_group, sequential_group): (Vec<_>, Vec<_>) = ready
                .into_iter()
                .partition(|step| parallel_eligible && step.parallel_capable());
            debug!(
                wave = wave_number,
                sequential = sequential_group.len(),
                parallel = parallel_group.len(),
                "wave partitioned"
            );

            for step in sequential_group {
                emit(&progress, total, completed, Some(step.name().to_string()));
                let result = self.execute_step(step, &context, &cancel).await?;
                completed += 1;
                emit(&progress, total, completed, None);
                executed.insert(result.name.clone());
                let step_failed = !result.success;
                if step_failed {
                    warn!(step = %result.name, "step failed; terminating workflow");
                }
                results.push(result);
                if step_failed {
                    return Ok(finish(false, results, context, start).await);
                }
            }

            if parallel_group.is_empty() {
                continue;
            }

            let wave_span = info_span!(
                "wave",
                wave = wave_number,
                parallel_steps = parallel_group.len(),
            );
            let mut tasks: JoinSet<Result<StepExecutionResult, TaskError>> = JoinSet::new();
            for step in parallel_group {
                emit(&progress, total, completed, Some(step.name().to_string()));
                let engine = self.clone();
                let context = context.clone();
                let cancel = cancel.clone();
                tasks.spawn(
                    async move { engine.execute_step(step, &context, &cancel).await }
                        .instrument(wave_span.clone()),
                );
            }

            // Await the whole wave; a failing sibling does not cancel peers.
            let mut wave_successes: Vec<StepExecutionResult> = Vec::new();
            let mut wave_failures: Vec<StepExecutionResult> = Vec::new();
            let mut wave_error: Option<TaskError> = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(result)) => {
                        completed += 1;
                        emit(&progress, total, completed, None);
                        executed.insert(result.name.clone());
                        if result.success {
                            wave_successes.push(result);
                        } else {
                            wave_failures.push(result);
                        }
                    }
                    Ok(Err(err)) => {
                        if wave_error.is_none() {
                            wave_error = Some(err);
                        }
                    }
                    Err(join_error) => {
                        warn!(error = %join_error, "parallel step task panicked");
                        if wave_error.is_none() {
                            wave_error =
                                Some(TaskError::failed(format!("step panicked: {join_error}")));
                        }
                    }
                }
            }
            if let Some(err) = wave_error {
                return Err(err);
            }

            let wave_failed = !wave_failures.is_empty();
            if wave_failed {
                for failure in &wave_failures {
                    warn!(step = %failure.name, "step failed; terminating workflow");
                }
            }
            // Completion order, with the wave's failures kept last so a
            // failed run's result list always ends with a failed entry.
            results.extend(wave_successes);
            results.extend(wave_failures);
            if wave_failed {
                return Ok(finish(false, results, context, start).await);
            }
        }

        info!(workflow = %workflow.name, steps = total, "workflow completed");
        Ok(finish(true, results, context, start).await)
    }

    async fn execute_step(
        &self,
        step: Arc<dyn WorkflowStep>,
        context: &WorkflowContext,
        cancel: &CancellationToken,
    ) -> Result<StepExecutionResult, TaskError> {
        let name = step.name().to_string();
        debug!(step = %name, "step starting");
        let start = Instant::now();
        let outcome = match &self.throttle {
            Some(throttle) => {
                let context = context.clone();
                throttle
                    .acquire_and_run(move |token| run_step(step, context, token), cancel.clone())
                    .await
            }
            None => run_step(step, context.clone(), cancel.child_token()).await,
        };
        let duration = start.elapsed();
        // Outer cancellation wins over whatever the step reported; partial
        // results are discarded, not synthesized.
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        match outcome {
            Ok(()) => {
                debug!(step = %name, ?duration, "step completed");
                Ok(StepExecutionResult {
                    name,
                    success: true,
                    error: None,
                    duration,
                })
            }
            Err(err) => {
                debug!(step = %name, error = %err, "step reported failure");
                Ok(StepExecutionResult {
                    name,
                    success: false,
                    error: Some(err.to_string()),
                    duration,
                })
            }
        }
    }
}

/// Invokes a step's `run`, folding a failed outcome into an error so the
/// throttle's failure counter sees it. Cancellation is surfaced as an error
/// and never captured into a step result.
async fn run_step(
    step: Arc<dyn WorkflowStep>,
    context: WorkflowContext,
    cancel: CancellationToken,
) -> Result<(), TaskError> {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return Err(TaskError::Cancelled),
        outcome = step.run(&context, cancel.clone()) => outcome,
    };
    if outcome.success {
        Ok(())
    } else {
        Err(TaskError::failed(outcome.error_message.unwrap_or_else(
            || format!("step '{}' reported failure", step.name()),
        )))
    }
}

fn validate(workflow: &Workflow) -> Result<(), TaskError> {
    let mut names = HashSet::with_capacity(workflow.steps.len());
    for step in &workflow.steps {
        if !names.insert(step.name().to_string()) {
            return Err(TaskError::invalid_argument(format!(
                "workflow '{}' declares step '{}' more than once",
                workflow.name,
                step.name(),
            )));
        }
    }
    for step in &workflow.steps {
        for pred in step.predecessors() {
            if !names.contains(pred.as_str()) {
                return Err(TaskError::invalid_argument(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name(),
                    pred,
                )));
            }
        }
    }
    Ok(())
}

async fn finish(
    success: bool,
    steps: Vec<StepExecutionResult>,
    context: WorkflowContext,
    start: Instant,
) -> WorkflowResult {
    WorkflowResult {
        success,
        steps,
        final_context: context.snapshot().await,
        duration: start.elapsed(),
    }
}

fn emit(
    progress: &Option<WorkflowProgressSink>,
    total: usize,
    completed: usize,
    current_step: Option<String>,
) {
    if let Some(sink) = progress {
        sink(WorkflowProgress {
            total,
            completed,
            current_step,
        });
    }
}
