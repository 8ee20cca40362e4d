//! Single-step execution: the condition gate and the
//! retry/backoff/timeout state machine.
//!
//! One call executes exactly one step within a run and owns every
//! transition of its `StepExecution` record. The engine only learns the
//! final outcome. Cancellation is checked at each suspension point: the
//! backoff sleep, the condition, and the in-flight attempt; a cancelled
//! attempt's result is discarded and the step never reaches COMPLETED.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::backoff::backoff_delay;
use crate::context::StepContext;
use crate::errors::{ErrorKind, RunError, StepError};
use crate::observe;
use crate::step::StepExecutor;
use crate::traits::WorkflowStore;
use crate::types::{StepExecution, StepStatus};

/// Terminal result of one step, as seen by the run driver.
pub(crate) enum StepOutcome {
    Completed { output: Vec<u8> },
    Failed { error: RunError },
    Cancelled,
}

/// Drive one step to a terminal status.
pub(crate) async fn execute_step(
    store: &Arc<dyn WorkflowStore>,
    step: &Arc<dyn StepExecutor>,
    exec: &mut StepExecution,
    ctx: &StepContext,
    input: &[u8],
    step_num: usize,
    total_steps: usize,
) -> StepOutcome {
    exec.started_at = Some(Utc::now());

    // Condition gate, evaluated with the handler's context. A false
    // verdict records the fallback output and completes the step so
    // downstream input resolution still finds an output.
    if let Some(condition) = step.condition() {
        let verdict = tokio::select! {
            _ = ctx.cancelled() => return finish_cancelled(store, exec).await,
            v = (condition)(ctx.clone()) => v,
        };
        match verdict {
            Ok(true) => {}
            Ok(false) => {
                let output = match step.fallback_output(input) {
                    Ok(output) => output,
                    Err(err) => return finish_failed(store, exec, err).await,
                };
                if let Err(e) = store
                    .save_step_output(&exec.run_id, &exec.step_id, &output)
                    .await
                {
                    observe::persistence_error(&exec.run_id, "save_step_output", &e);
                    return finish_failed(store, exec, StepError::Store(e)).await;
                }
                exec.status = StepStatus::Completed;
                exec.output = Some(output.clone());
                finalize(exec);
                if let Err(e) = store.update_step_execution(exec).await {
                    observe::persistence_error(&exec.run_id, "update_step_execution", &e);
                    return StepOutcome::Failed {
                        error: RunError::new(ErrorKind::Store, e.to_string()),
                    };
                }
                observe::step_skipped(&exec.run_id, &exec.step_id, "condition evaluated to false");
                return StepOutcome::Completed { output };
            }
            Err(e) => {
                let err = StepError::Condition {
                    message: e.to_string(),
                };
                return finish_failed(store, exec, err).await;
            }
        }
    }

    let config = step.config().clone();
    let mut attempt: u32 = 0;

    loop {
        let delay = backoff_delay(config.retry_delay_ms, attempt, config.retry_backoff);
        if attempt > 0 {
            observe::step_retrying(&exec.run_id, &exec.step_id, attempt, delay);
            if !delay.is_zero() {
                tokio::select! {
                    _ = ctx.cancelled() => return finish_cancelled(store, exec).await,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        if ctx.is_cancelled() {
            return finish_cancelled(store, exec).await;
        }

        if attempt == 0 {
            observe::step_started(
                &exec.run_id,
                &exec.step_id,
                step.name(),
                step_num,
                total_steps,
            );
        }

        exec.status = StepStatus::Running;
        exec.attempt = attempt;
        exec.updated_at = Utc::now();
        if let Err(e) = store.update_step_execution(exec).await {
            observe::persistence_error(&exec.run_id, "update_step_execution", &e);
            return finish_failed(store, exec, StepError::Store(e)).await;
        }

        let attempt_ctx = ctx.with_attempt(attempt);
        let attempt_fut = step.execute(attempt_ctx, input);
        let result = if config.timeout_seconds > 0 {
            tokio::select! {
                _ = ctx.cancelled() => return finish_cancelled(store, exec).await,
                r = tokio::time::timeout(
                    Duration::from_secs(config.timeout_seconds),
                    attempt_fut,
                ) => match r {
                    Ok(inner) => inner,
                    Err(_) => Err(StepError::Timeout {
                        timeout_seconds: config.timeout_seconds,
                    }),
                },
            }
        } else {
            tokio::select! {
                _ = ctx.cancelled() => return finish_cancelled(store, exec).await,
                r = attempt_fut => r,
            }
        };

        match result {
            Ok(output) => {
                if let Err(e) = store
                    .save_step_output(&exec.run_id, &exec.step_id, &output)
                    .await
                {
                    observe::persistence_error(&exec.run_id, "save_step_output", &e);
                    return finish_failed(store, exec, StepError::Store(e)).await;
                }
                exec.status = StepStatus::Completed;
                exec.output = Some(output.clone());
                finalize(exec);
                if let Err(e) = store.update_step_execution(exec).await {
                    observe::persistence_error(&exec.run_id, "update_step_execution", &e);
                    return StepOutcome::Failed {
                        error: RunError::new(ErrorKind::Store, e.to_string()),
                    };
                }
                observe::step_completed(
                    &exec.run_id,
                    &exec.step_id,
                    exec.duration_ms.unwrap_or(0),
                    attempt + 1,
                );
                return StepOutcome::Completed { output };
            }
            Err(err) => {
                if attempt < config.max_retries {
                    exec.status = StepStatus::Retrying;
                    exec.attempt = attempt + 1;
                    exec.updated_at = Utc::now();
                    if let Err(e) = store.update_step_execution(exec).await {
                        observe::persistence_error(&exec.run_id, "update_step_execution", &e);
                        return finish_failed(store, exec, StepError::Store(e)).await;
                    }
                    attempt += 1;
                    continue;
                }
                return finish_failed(store, exec, err).await;
            }
        }
    }
}

/// Record a terminal failure on the step execution.
async fn finish_failed(
    store: &Arc<dyn WorkflowStore>,
    exec: &mut StepExecution,
    error: StepError,
) -> StepOutcome {
    let run_error = RunError::from(&error);
    exec.status = StepStatus::Failed;
    exec.error = Some(run_error.clone());
    finalize(exec);
    observe::step_failed(
        &exec.run_id,
        &exec.step_id,
        &error,
        exec.attempt,
        exec.duration_ms.unwrap_or(0),
    );
    if let Err(e) = store.update_step_execution(exec).await {
        observe::persistence_error(&exec.run_id, "update_step_execution", &e);
    }
    StepOutcome::Failed { error: run_error }
}

/// The run was cancelled while this step was in flight. The step ends
/// terminal-but-not-completed; the driver transitions the run.
async fn finish_cancelled(
    store: &Arc<dyn WorkflowStore>,
    exec: &mut StepExecution,
) -> StepOutcome {
    let error = StepError::Cancelled;
    exec.status = StepStatus::Failed;
    exec.error = Some(RunError::from(&error));
    finalize(exec);
    if let Err(e) = store.update_step_execution(exec).await {
        observe::persistence_error(&exec.run_id, "update_step_execution", &e);
    }
    StepOutcome::Cancelled
}

/// Stamp terminal timing: `duration_ms` is defined as
/// `completed_at - started_at` and only exists on terminal records.
fn finalize(exec: &mut StepExecution) {
    let now = Utc::now();
    exec.completed_at = Some(now);
    exec.updated_at = now;
    let started = exec.started_at.unwrap_or(now);
    exec.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
}
