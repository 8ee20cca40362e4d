//! Retry, backoff timing, timeout, and failure-propagation behavior.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{test_engine, wait_for_completion, MathInput, SumOutput};
use conveyor_engine::{
    BackoffStrategy, ErrorKind, RunStatus, StartOptions, Step, StepContext, StepStatus,
    ValidationError, WorkflowBuilder,
};

/// A step that fails until `succeed_at` attempts have happened, recording
/// the instant each attempt began.
fn flaky_step(
    id: &str,
    succeed_at: u32,
    attempts: Arc<AtomicU32>,
    instants: Arc<Mutex<Vec<Instant>>>,
) -> Step<MathInput, SumOutput> {
    Step::new(id, "Flaky", move |_ctx: StepContext, _input: MathInput| {
        let attempts = Arc::clone(&attempts);
        let instants = Arc::clone(&instants);
        async move {
            instants.lock().unwrap().push(Instant::now());
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < succeed_at {
                Err("temporary failure".into())
            } else {
                Ok(SumOutput { sum: i64::from(n) })
            }
        }
    })
}

fn gaps(instants: &Mutex<Vec<Instant>>) -> Vec<Duration> {
    let instants = instants.lock().unwrap();
    instants.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_close(actual: Duration, expected: Duration, tolerance: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= tolerance,
        "expected ~{expected:?}, got {actual:?} (tolerance {tolerance:?})"
    );
}

const TOLERANCE: Duration = Duration::from_millis(80);

#[tokio::test]
async fn retry_then_success() {
    let (engine, _store) = test_engine();
    let attempts = Arc::new(AtomicU32::new(0));
    let instants = Arc::new(Mutex::new(Vec::new()));

    let step = flaky_step("retry", 3, Arc::clone(&attempts), Arc::clone(&instants))
        .with_retries(3)
        .with_retry_delay(Duration::from_millis(100))
        .with_backoff(BackoffStrategy::Linear);

    let wf = Arc::new(
        WorkflowBuilder::new("retry_success", "Retry success")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new())
        .await
        .unwrap();
    let run = wait_for_completion(&engine, &run_id, Duration::from_secs(10)).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let steps = engine.get_step_executions(&run_id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Completed);
    assert_eq!(steps[0].attempt, 2);

    // Linear backoff with 100 ms base: ~100 ms then ~200 ms.
    let deltas = gaps(&instants);
    assert_eq!(deltas.len(), 2);
    assert_close(deltas[0], Duration::from_millis(100), TOLERANCE);
    assert_close(deltas[1], Duration::from_millis(200), TOLERANCE);
}

#[tokio::test]
async fn retry_exhaustion_fails_the_run() {
    let (engine, _store) = test_engine();
    let attempts = Arc::new(AtomicU32::new(0));
    let instants = Arc::new(Mutex::new(Vec::new()));

    let step = flaky_step("fail", u32::MAX, Arc::clone(&attempts), instants)
        .with_retries(3)
        .with_retry_delay(Duration::from_millis(50))
        .with_backoff(BackoffStrategy::Linear);

    let wf = Arc::new(
        WorkflowBuilder::new("exhaust", "Exhaust")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new())
        .await
        .unwrap();
    let run = wait_for_completion(&engine, &run_id, Duration::from_secs(10)).await;

    assert_eq!(run.status, RunStatus::Failed);
    // Four total attempts: the first plus three retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let error = run.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Handler);
    assert!(error.message.contains("temporary failure"));

    let steps = engine.get_step_executions(&run_id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert!(steps[0].error.is_some());
    assert!(steps[0].duration_ms.is_some());
}

#[tokio::test]
async fn exponential_backoff_doubles_gaps() {
    let (engine, _store) = test_engine();
    let attempts = Arc::new(AtomicU32::new(0));
    let instants = Arc::new(Mutex::new(Vec::new()));

    let step = flaky_step("exp", 4, Arc::clone(&attempts), Arc::clone(&instants))
        .with_retries(3)
        .with_retry_delay(Duration::from_millis(100))
        .with_backoff(BackoffStrategy::Exponential);

    let wf = Arc::new(
        WorkflowBuilder::new("exp_backoff", "Exponential backoff")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new())
        .await
        .unwrap();
    wait_for_completion(&engine, &run_id, Duration::from_secs(15)).await;

    let deltas = gaps(&instants);
    assert_eq!(deltas.len(), 3);
    assert_close(deltas[0], Duration::from_millis(100), TOLERANCE);
    assert_close(deltas[1], Duration::from_millis(200), TOLERANCE);
    assert_close(deltas[2], Duration::from_millis(400), TOLERANCE);
}

#[tokio::test]
async fn no_backoff_retries_immediately() {
    let (engine, _store) = test_engine();
    let attempts = Arc::new(AtomicU32::new(0));
    let instants = Arc::new(Mutex::new(Vec::new()));

    let step = flaky_step("eager", 3, Arc::clone(&attempts), Arc::clone(&instants))
        .with_retries(2)
        .with_retry_delay(Duration::from_millis(100))
        .with_backoff(BackoffStrategy::None);

    let wf = Arc::new(
        WorkflowBuilder::new("no_backoff", "No backoff")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new())
        .await
        .unwrap();
    wait_for_completion(&engine, &run_id, Duration::from_secs(10)).await;

    for delta in gaps(&instants) {
        assert!(delta < Duration::from_millis(80), "unexpected sleep {delta:?}");
    }
}

#[tokio::test]
async fn attempt_deadline_is_a_retryable_failure() {
    let (engine, _store) = test_engine();
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let step = Step::new("slow", "Slow", move |_ctx: StepContext, _input: MathInput| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(SumOutput { sum: 0 })
        }
    })
    .with_timeout(Duration::from_secs(1))
    .with_retries(1)
    .with_retry_delay(Duration::from_millis(50));

    let wf = Arc::new(
        WorkflowBuilder::new("timeout", "Timeout")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new())
        .await
        .unwrap();
    let run = wait_for_completion(&engine, &run_id, Duration::from_secs(15)).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let error = run.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Timeout);

    let steps = engine.get_step_executions(&run_id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn timeout_then_fast_attempt_succeeds() {
    let (engine, _store) = test_engine();
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let step = Step::new(
        "slow_then_fast",
        "Slow then fast",
        move |_ctx: StepContext, _input: MathInput| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Ok(SumOutput { sum: i64::from(n) })
            }
        },
    )
    .with_timeout(Duration::from_millis(500))
    .with_retries(3)
    .with_retry_delay(Duration::from_millis(100));

    let wf = Arc::new(
        WorkflowBuilder::new("timeout_retry", "Timeout retry")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new())
        .await
        .unwrap();
    let run = wait_for_completion(&engine, &run_id, Duration::from_secs(15)).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn zero_retries_means_exactly_one_attempt() {
    let (engine, _store) = test_engine();
    let attempts = Arc::new(AtomicU32::new(0));
    let instants = Arc::new(Mutex::new(Vec::new()));

    let step = flaky_step("once", u32::MAX, Arc::clone(&attempts), instants).with_retries(0);

    let wf = Arc::new(
        WorkflowBuilder::new("single_shot", "Single shot")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new().synchronous())
        .await
        .unwrap();

    let run = engine.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let steps = engine.get_step_executions(&run_id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert_eq!(steps[0].attempt, 0);
}

#[tokio::test]
async fn continue_on_error_records_failure_but_run_completes() {
    let (engine, _store) = test_engine();

    let doomed = Step::new("doomed", "Doomed", |_ctx: StepContext, _input: MathInput| async move {
        Err::<SumOutput, _>("step failed".into())
    })
    .with_retries(0)
    .continue_on_error(true);

    let survivor = Step::new(
        "survivor",
        "Survivor",
        |_ctx: StepContext, input: MathInput| async move {
            Ok(SumOutput {
                sum: input.a + input.b,
            })
        },
    );

    let wf = Arc::new(
        WorkflowBuilder::new("continue", "Continue on error")
            .then_step(doomed)
            .then_step(survivor)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 4, b: 5 }, StartOptions::new().synchronous())
        .await
        .unwrap();

    let run = engine.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.progress, 1.0);
    assert!(run.error.is_none());

    // The failed step never contributes the workflow output.
    let output: SumOutput = run.output_as().unwrap().unwrap();
    assert_eq!(output.sum, 9);

    let steps = engine.get_step_executions(&run_id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert!(steps[0].error.is_some());
    assert_eq!(steps[1].status, StepStatus::Completed);
}

#[tokio::test]
async fn validation_failures_consume_retry_attempts() {
    let (engine, _store) = test_engine();
    let checks = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&checks);
    let step = Step::new("guarded", "Guarded", |_ctx: StepContext, input: MathInput| async move {
        Ok(SumOutput {
            sum: input.a + input.b,
        })
    })
    .with_input_validator(move |_input: &MathInput| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ValidationError::single("a", "range"))
    })
    .with_retries(1)
    .with_retry_delay(Duration::from_millis(20));

    let wf = Arc::new(
        WorkflowBuilder::new("guarded", "Guarded")
            .then_step(step)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 1 }, StartOptions::new().synchronous())
        .await
        .unwrap();

    let run = engine.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.unwrap().kind, ErrorKind::Validation);
    // Validation errors count as attempt failures for retry purposes.
    assert_eq!(checks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn continue_on_error_step_does_not_break_input_chain() {
    let (engine, _store) = test_engine();

    // doomed never records an output, so its successor falls back to the
    // run input.
    let first = Step::new("first", "First", |_ctx: StepContext, input: MathInput| async move {
        Ok(MathInput {
            a: input.a * 10,
            b: input.b,
        })
    });
    let doomed = Step::new("doomed", "Doomed", |_ctx: StepContext, _input: MathInput| async move {
        Err::<SumOutput, _>("nope".into())
    })
    .with_retries(0)
    .continue_on_error(true);
    let last = Step::new("last", "Last", |_ctx: StepContext, input: MathInput| async move {
        Ok(SumOutput {
            sum: input.a + input.b,
        })
    });

    let wf = Arc::new(
        WorkflowBuilder::new("chain", "Chain")
            .then_step(first)
            .then_step(doomed)
            .then_step(last)
            .build()
            .unwrap(),
    );
    let run_id = engine
        .start_workflow(wf, &MathInput { a: 1, b: 2 }, StartOptions::new().synchronous())
        .await
        .unwrap();

    let run = engine.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let output: SumOutput = run.output_as().unwrap().unwrap();
    assert_eq!(output.sum, 3);
}
