//! The per-run orchestrator.
//!
//! `start_workflow` creates the run record, then drives the graph's
//! topological order through the step executor — inline when the caller
//! asked for a synchronous start, otherwise on a spawned driver task. One
//! driver task exists per in-flight run, bounded by
//! `max_concurrent_workflows`; excess asynchronous starts block until a
//! slot frees. Cancellation is cooperative through a per-run signal the
//! driver checks at every safe boundary, and the run-level timeout feeds
//! the same signal.

mod builder;

pub use builder::EngineBuilder;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, RwLock, Semaphore};
use uuid::Uuid;

use crate::context::{CancelToken, StateAccessor, StepContext, StepDataAccessor};
use crate::errors::{EngineError, ErrorKind, RunError};
use crate::executor::{execute_step, StepOutcome};
use crate::graph::StepGraph;
use crate::observe;
use crate::traits::WorkflowStore;
use crate::types::{
    EngineConfig, RunFilter, RunStatus, StartOptions, StepExecution, StepStatus, WorkflowRun,
};
use crate::workflow::Workflow;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Executes workflows against a single store. Cheap to clone; clones share
/// the concurrency limiter and cancellation registry. Multiple engines can
/// coexist — there is no process-global state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn WorkflowStore>,
    config: EngineConfig,
    limiter: Arc<Semaphore>,
    /// Cancellation senders for runs hosted by this engine.
    cancels: RwLock<HashMap<String, watch::Sender<bool>>>,
}

impl Engine {
    /// An engine with default configuration over the given store.
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self::builder().shared_store(store).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_parts(store: Arc<dyn WorkflowStore>, config: EngineConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_workflows.max(1)));
        Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                limiter,
                cancels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a run for `workflow` and begin driving it.
    ///
    /// The input is serialized to JSON at this boundary. By default the
    /// call returns as soon as the run record exists and a driver task is
    /// launched; with [`StartOptions::synchronous`] it returns only once
    /// the run is terminal. Either way the returned run id can be polled
    /// through [`get_run`](Self::get_run).
    pub async fn start_workflow<T: Serialize + ?Sized>(
        &self,
        workflow: Arc<Workflow>,
        input: &T,
        options: StartOptions,
    ) -> Result<String, EngineError> {
        let run_id = Uuid::new_v4().to_string();
        let input_bytes = serde_json::to_vec(input)?;
        let now = Utc::now();

        let mut tags = workflow.tags().cloned();
        if let Some(extra) = options.tags {
            tags.get_or_insert_with(BTreeMap::new).extend(extra);
        }

        let run = WorkflowRun {
            run_id: run_id.clone(),
            workflow_id: workflow.id().to_string(),
            workflow_version: workflow.version().to_string(),
            status: RunStatus::Pending,
            progress: 0.0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            input: Some(input_bytes),
            output: None,
            error: None,
            resource_id: options.resource_id,
            tags,
            context: workflow.context().map(|bytes| bytes.to_vec()),
        };
        self.inner.store.create_run(&run).await?;
        observe::workflow_created(&run_id, workflow.id(), run.resource_id.as_deref());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.inner
            .cancels
            .write()
            .await
            .insert(run_id.clone(), cancel_tx);
        let cancel = CancelToken::new(cancel_rx);

        // Counts toward the concurrency limit for the whole drive, sync or
        // async. The semaphore is never closed.
        let permit = Arc::clone(&self.inner.limiter)
            .acquire_owned()
            .await
            .expect("run limiter closed");

        let inner = Arc::clone(&self.inner);
        let driver_run_id = run_id.clone();
        let driver = async move {
            let _permit = permit;

            // Run-level timeout: feeds the same cooperative cancel signal.
            let watchdog = {
                let inner = Arc::clone(&inner);
                let run_id = driver_run_id.clone();
                let timeout = inner.config.run_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(tx) = inner.cancels.read().await.get(&run_id) {
                        let _ = tx.send(true);
                    }
                })
            };

            drive(Arc::clone(&inner.store), workflow, run, cancel).await;

            watchdog.abort();
            inner.cancels.write().await.remove(&driver_run_id);
        };

        if options.synchronous {
            driver.await;
        } else {
            tokio::spawn(driver);
        }
        Ok(run_id)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, EngineError> {
        Ok(self.inner.store.get_run(run_id).await?)
    }

    /// Step executions for a run, ordered by execution index.
    pub async fn get_step_executions(
        &self,
        run_id: &str,
    ) -> Result<Vec<StepExecution>, EngineError> {
        Ok(self.inner.store.list_step_executions(run_id).await?)
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, EngineError> {
        Ok(self.inner.store.list_runs(filter).await?)
    }

    /// Request cancellation of a run.
    ///
    /// For a run hosted by this engine the signal propagates into the
    /// driver, which transitions the run to CANCELLED at the next safe
    /// boundary. For a run hosted elsewhere, the persisted status is
    /// updated directly when the run is still non-terminal; a terminal run
    /// is left untouched.
    pub async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        {
            let cancels = self.inner.cancels.read().await;
            if let Some(tx) = cancels.get(run_id) {
                let _ = tx.send(true);
                return Ok(());
            }
        }
        let run = self.inner.store.get_run(run_id).await?;
        if !run.status.is_terminal() {
            self.inner
                .store
                .update_run_status(run_id, RunStatus::Cancelled, None)
                .await?;
            observe::workflow_cancelled(run_id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Drive one run to its single terminal transition.
async fn drive(
    store: Arc<dyn WorkflowStore>,
    workflow: Arc<Workflow>,
    mut run: WorkflowRun,
    cancel: CancelToken,
) {
    let started = Utc::now();
    run.status = RunStatus::Running;
    run.started_at = Some(started);
    run.updated_at = started;
    if let Err(e) = store.update_run(&run).await {
        observe::persistence_error(&run.run_id, "update_run", &e);
        run.error = Some(RunError::new(ErrorKind::Store, e.to_string()));
        finish_failed(&store, run).await;
        return;
    }
    observe::workflow_started(&run.run_id, &run.workflow_id, run.resource_id.as_deref());

    let order = match workflow.graph().topological_order() {
        Ok(order) => order,
        Err(e) => {
            run.error = Some(RunError::new(ErrorKind::Graph, e.to_string()));
            finish_failed(&store, run).await;
            return;
        }
    };
    let total = order.len();

    // Run-scoped accessors, constructed once and shared by every step
    // context of this run. Caches never cross runs.
    let run_id_arc: Arc<str> = Arc::from(run.run_id.as_str());
    let data = Arc::new(StepDataAccessor::new(run.run_id.clone(), Arc::clone(&store)));
    let state = Arc::new(StateAccessor::new(run.run_id.clone(), Arc::clone(&store)));
    let user_context = run.context.clone().map(Arc::new);

    // Outputs of completed steps, keyed by step id, carrying the execution
    // index for "most recent predecessor" input resolution.
    let mut outputs: HashMap<String, (u32, Vec<u8>)> = HashMap::new();
    let mut last_output: Option<(u32, Vec<u8>)> = None;
    let mut done = 0usize;

    for (index, step_id) in order.iter().enumerate() {
        if cancel.is_cancelled() {
            finish_cancelled(&store, run).await;
            return;
        }
        let Some(step) = workflow.step(step_id) else {
            run.error = Some(RunError::new(
                ErrorKind::Graph,
                format!("step {step_id} missing from workflow"),
            ));
            finish_failed(&store, run).await;
            return;
        };

        let input = resolve_input(&run, workflow.graph(), step_id, &outputs);
        let now = Utc::now();
        let mut exec = StepExecution {
            run_id: run.run_id.clone(),
            step_id: step_id.clone(),
            execution_index: index as u32,
            status: StepStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            input: Some(input.clone()),
            output: None,
            attempt: 0,
            error: None,
        };
        if let Err(e) = store.create_step_execution(&exec).await {
            observe::persistence_error(&run.run_id, "create_step_execution", &e);
            run.error = Some(RunError::new(ErrorKind::Store, e.to_string()));
            finish_failed(&store, run).await;
            return;
        }

        let ctx = StepContext::new(
            Arc::clone(&run_id_arc),
            Arc::from(step_id.as_str()),
            cancel.clone(),
            Arc::clone(&data),
            Arc::clone(&state),
            user_context.clone(),
        );

        match execute_step(&store, step, &mut exec, &ctx, &input, index + 1, total).await {
            StepOutcome::Completed { output } => {
                outputs.insert(step_id.clone(), (index as u32, output.clone()));
                if last_output
                    .as_ref()
                    .map_or(true, |(last, _)| index as u32 >= *last)
                {
                    last_output = Some((index as u32, output));
                }
                done += 1;
            }
            StepOutcome::Failed { error } => {
                if !step.config().continue_on_error {
                    run.error = Some(error);
                    finish_failed(&store, run).await;
                    return;
                }
                // Recorded on the step; the run proceeds and the workflow
                // output is not taken from this step.
            }
            StepOutcome::Cancelled => {
                finish_cancelled(&store, run).await;
                return;
            }
        }

        run.progress = done as f64 / total as f64;
        run.updated_at = Utc::now();
        if let Err(e) = store.update_run(&run).await {
            observe::persistence_error(&run.run_id, "update_run", &e);
            run.error = Some(RunError::new(ErrorKind::Store, e.to_string()));
            finish_failed(&store, run).await;
            return;
        }
        observe::workflow_progress(&run.run_id, run.progress);
    }

    // A cancel landing after the last step is not acknowledged: every step
    // already ran, so the run completes and the late cancel is a no-op.
    run.output = last_output.map(|(_, output)| output);
    run.progress = 1.0;
    finish_completed(&store, run).await;
}

/// Determine a step's input bytes: the run input for the entry point, the
/// most recently completed predecessor's output otherwise, and the run
/// input again when no predecessor recorded an output.
fn resolve_input(
    run: &WorkflowRun,
    graph: &StepGraph,
    step_id: &str,
    outputs: &HashMap<String, (u32, Vec<u8>)>,
) -> Vec<u8> {
    let run_input = || run.input.clone().unwrap_or_else(|| b"null".to_vec());
    let predecessors = graph.predecessors(step_id);
    if predecessors.is_empty() {
        return run_input();
    }
    predecessors
        .iter()
        .filter_map(|p| outputs.get(*p))
        .max_by_key(|(index, _)| *index)
        .map(|(_, bytes)| bytes.clone())
        .unwrap_or_else(run_input)
}

async fn finish_completed(store: &Arc<dyn WorkflowStore>, mut run: WorkflowRun) {
    let now = Utc::now();
    run.status = RunStatus::Completed;
    run.completed_at = Some(now);
    run.updated_at = now;
    if let Err(e) = store.update_run(&run).await {
        observe::persistence_error(&run.run_id, "update_run", &e);
        let error = RunError::new(ErrorKind::Store, e.to_string());
        let _ = store
            .update_run_status(&run.run_id, RunStatus::Failed, Some(error.clone()))
            .await;
        observe::workflow_failed(&run.run_id, &error);
        return;
    }
    let duration = run
        .started_at
        .and_then(|started| (now - started).to_std().ok())
        .unwrap_or_default();
    observe::workflow_completed(&run.run_id, duration);
}

async fn finish_failed(store: &Arc<dyn WorkflowStore>, mut run: WorkflowRun) {
    let now = Utc::now();
    run.status = RunStatus::Failed;
    run.completed_at = Some(now);
    run.updated_at = now;
    let error = run
        .error
        .clone()
        .unwrap_or_else(|| RunError::new(ErrorKind::Handler, "workflow failed"));
    if let Err(e) = store.update_run(&run).await {
        observe::persistence_error(&run.run_id, "update_run", &e);
    }
    observe::workflow_failed(&run.run_id, &error);
}

async fn finish_cancelled(store: &Arc<dyn WorkflowStore>, mut run: WorkflowRun) {
    let now = Utc::now();
    run.status = RunStatus::Cancelled;
    run.completed_at = Some(now);
    run.updated_at = now;
    if let Err(e) = store.update_run(&run).await {
        observe::persistence_error(&run.run_id, "update_run", &e);
    }
    observe::workflow_cancelled(&run.run_id);
}
