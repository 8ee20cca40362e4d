#![allow(dead_code)]

//! Shared fixtures for engine integration tests.

use std::sync::{Arc, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use conveyor_engine::{Engine, InMemoryStore, WorkflowRun, WorkflowStore};

static INIT_TRACING: Once = Once::new();

/// Route engine events through a test-friendly subscriber, honoring
/// `RUST_LOG`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// Input/output types used across the integration tests.

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MathInput {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SumOutput {
    pub sum: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProductOutput {
    pub product: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SummaryOutput {
    pub message: String,
    pub result: i64,
}

/// Engine over a fresh in-memory store; the store is returned too so tests
/// can inspect persisted rows directly.
pub fn test_engine() -> (Engine, Arc<dyn WorkflowStore>) {
    init_tracing();
    let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
    let engine = Engine::builder().shared_store(Arc::clone(&store)).build();
    (engine, store)
}

/// Poll until the run reaches a terminal status.
pub async fn wait_for_completion(engine: &Engine, run_id: &str, timeout: Duration) -> WorkflowRun {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let run = engine.get_run(run_id).await.expect("get_run failed");
        if run.status.is_terminal() {
            return run;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for run {run_id} to complete"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
