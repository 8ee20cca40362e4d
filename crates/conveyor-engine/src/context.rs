//! Runtime context given to every step invocation.
//!
//! Handlers interact with the engine exclusively through [`StepContext`]:
//! typed reads of prior step data, typed read/write of run-scoped state,
//! the cancellation signal, and the opaque user context. The engine
//! constructs a fresh context per step — handler code never creates one.
//!
//! Accessors are run-scoped and cache-through. Caches are per-run and
//! never shared across runs; handlers must not hold a context across runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, RwLock};

use crate::errors::StepError;
use crate::traits::WorkflowStore;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation signal for one run.
///
/// The engine checks it at every suspension point (retry sleeps, attempt
/// boundaries, between steps); long-running handlers can observe it too.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without a cancel: the run driver has moved
                // on. Stay pending so in-flight selects pick the work arm.
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Data accessor
// ---------------------------------------------------------------------------

/// Typed, cache-through read access to prior step inputs and outputs.
pub struct StepDataAccessor {
    run_id: String,
    store: Arc<dyn WorkflowStore>,
    outputs: RwLock<HashMap<String, Vec<u8>>>,
    inputs: RwLock<HashMap<String, Vec<u8>>>,
}

impl StepDataAccessor {
    pub fn new(run_id: impl Into<String>, store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            run_id: run_id.into(),
            store,
            outputs: RwLock::new(HashMap::new()),
            inputs: RwLock::new(HashMap::new()),
        }
    }

    /// Load and deserialize the stored output of a step. Cache hits skip
    /// the store entirely.
    pub async fn get_output<T: DeserializeOwned>(&self, step_id: &str) -> Result<T, StepError> {
        if let Some(bytes) = self.outputs.read().await.get(step_id) {
            return decode(step_id, "output", bytes);
        }
        let bytes = self.store.load_step_output(&self.run_id, step_id).await?;
        let value = decode(step_id, "output", &bytes)?;
        self.outputs
            .write()
            .await
            .insert(step_id.to_string(), bytes);
        Ok(value)
    }

    /// Load and deserialize the input that was recorded for a step.
    pub async fn get_input<T: DeserializeOwned>(&self, step_id: &str) -> Result<T, StepError> {
        if let Some(bytes) = self.inputs.read().await.get(step_id) {
            return decode(step_id, "input", bytes);
        }
        let exec = self.store.get_step_execution(&self.run_id, step_id).await?;
        let bytes = exec.input.ok_or_else(|| StepError::Handler {
            message: format!("no input recorded for step {step_id}"),
        })?;
        let value = decode(step_id, "input", &bytes)?;
        self.inputs.write().await.insert(step_id.to_string(), bytes);
        Ok(value)
    }

    /// True iff a stored output exists for the step. No deserialization.
    pub async fn has_output(&self, step_id: &str) -> bool {
        if self.outputs.read().await.contains_key(step_id) {
            return true;
        }
        self.store
            .load_step_output(&self.run_id, step_id)
            .await
            .is_ok()
    }
}

fn decode<T: DeserializeOwned>(step_id: &str, what: &str, bytes: &[u8]) -> Result<T, StepError> {
    serde_json::from_slice(bytes).map_err(|e| StepError::Handler {
        message: format!("failed to decode {what} of step {step_id}: {e}"),
    })
}

// ---------------------------------------------------------------------------
// State accessor
// ---------------------------------------------------------------------------

/// Typed, cache-through read/write access to the run's key-value state.
///
/// Writes persist to the store first; the cache entry is only updated once
/// the store write succeeds, so a store failure leaves the cache coherent.
pub struct StateAccessor {
    run_id: String,
    store: Arc<dyn WorkflowStore>,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl StateAccessor {
    pub fn new(run_id: impl Into<String>, store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            run_id: run_id.into(),
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StepError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StepError::Handler {
            message: format!("failed to encode state value for key {key}: {e}"),
        })?;
        self.store.save_state(&self.run_id, key, &bytes).await?;
        self.cache.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StepError> {
        if let Some(bytes) = self.cache.read().await.get(key) {
            return decode_state(key, bytes);
        }
        let bytes = self.store.load_state(&self.run_id, key).await?;
        let value = decode_state(key, &bytes)?;
        self.cache.write().await.insert(key.to_string(), bytes);
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StepError> {
        self.store.delete_state(&self.run_id, key).await?;
        self.cache.write().await.remove(key);
        Ok(())
    }

    pub async fn has(&self, key: &str) -> bool {
        if self.cache.read().await.contains_key(key) {
            return true;
        }
        self.store.load_state(&self.run_id, key).await.is_ok()
    }

    /// Load every key for this run from the store and refresh the cache.
    pub async fn get_all(&self) -> Result<HashMap<String, Vec<u8>>, StepError> {
        let all = self
            .store
            .get_all_state(&self.run_id)
            .await
            .map_err(StepError::Store)?;
        let mut cache = self.cache.write().await;
        for (k, v) in &all {
            cache.insert(k.clone(), v.clone());
        }
        Ok(all)
    }
}

fn decode_state<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StepError> {
    serde_json::from_slice(bytes).map_err(|e| StepError::Handler {
        message: format!("failed to decode state value for key {key}: {e}"),
    })
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// The context handed to a step's handler and condition.
#[derive(Clone)]
pub struct StepContext {
    run_id: Arc<str>,
    step_id: Arc<str>,
    attempt: u32,
    cancel: CancelToken,
    data: Arc<StepDataAccessor>,
    state: Arc<StateAccessor>,
    user_context: Option<Arc<Vec<u8>>>,
}

impl StepContext {
    pub(crate) fn new(
        run_id: Arc<str>,
        step_id: Arc<str>,
        cancel: CancelToken,
        data: Arc<StepDataAccessor>,
        state: Arc<StateAccessor>,
        user_context: Option<Arc<Vec<u8>>>,
    ) -> Self {
        Self {
            run_id,
            step_id,
            attempt: 0,
            cancel,
            data,
            state,
            user_context,
        }
    }

    pub(crate) fn with_attempt(&self, attempt: u32) -> Self {
        let mut ctx = self.clone();
        ctx.attempt = attempt;
        ctx
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Zero-based attempt currently executing.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled; select against long work.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Prior-step reads.
    pub fn data(&self) -> &StepDataAccessor {
        &self.data
    }

    /// Run-scoped key-value state.
    pub fn state(&self) -> &StateAccessor {
        &self.state
    }

    /// Deserialize the workflow's user context, if one was set.
    pub fn context_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.user_context
            .as_deref()
            .map(|bytes| serde_json::from_slice(bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryStore;
    use crate::errors::StoreError;
    use crate::types::{RunStatus, StepExecution, StepStatus, WorkflowRun};
    use chrono::Utc;

    fn seeded_store() -> Arc<dyn WorkflowStore> {
        Arc::new(InMemoryStore::new())
    }

    async fn create_run(store: &Arc<dyn WorkflowStore>, run_id: &str) {
        let now = Utc::now();
        let run = WorkflowRun {
            run_id: run_id.into(),
            workflow_id: "wf".into(),
            workflow_version: "1.0.0".into(),
            status: RunStatus::Running,
            progress: 0.0,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            updated_at: now,
            input: None,
            output: None,
            error: None,
            resource_id: None,
            tags: None,
            context: None,
        };
        store.create_run(&run).await.unwrap();
    }

    #[tokio::test]
    async fn output_cache_round_trip() {
        let store = seeded_store();
        create_run(&store, "r1").await;
        store
            .save_step_output("r1", "discover", br#"{"count":3}"#)
            .await
            .unwrap();

        let data = StepDataAccessor::new("r1", Arc::clone(&store));
        let first: serde_json::Value = data.get_output("discover").await.unwrap();
        assert_eq!(first["count"], 3);
        assert!(data.has_output("discover").await);

        // Second read hits the cache even if the store row changes.
        store
            .save_step_output("r1", "discover", br#"{"count":99}"#)
            .await
            .unwrap();
        let second: serde_json::Value = data.get_output("discover").await.unwrap();
        assert_eq!(second["count"], 3);
    }

    #[tokio::test]
    async fn missing_output_is_not_found() {
        let store = seeded_store();
        create_run(&store, "r1").await;
        let data = StepDataAccessor::new("r1", Arc::clone(&store));
        let err = data
            .get_output::<serde_json::Value>("ghost")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Store(StoreError::StepOutputNotFound { .. })
        ));
        assert!(!data.has_output("ghost").await);
    }

    #[tokio::test]
    async fn get_input_reads_execution_record() {
        let store = seeded_store();
        create_run(&store, "r1").await;
        let now = Utc::now();
        let exec = StepExecution {
            run_id: "r1".into(),
            step_id: "enrich".into(),
            execution_index: 0,
            status: StepStatus::Completed,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: Some(now),
            duration_ms: Some(1),
            input: Some(br#"{"limit":10}"#.to_vec()),
            output: None,
            attempt: 0,
            error: None,
        };
        store.create_step_execution(&exec).await.unwrap();

        let data = StepDataAccessor::new("r1", Arc::clone(&store));
        let input: serde_json::Value = data.get_input("enrich").await.unwrap();
        assert_eq!(input["limit"], 10);
    }

    #[tokio::test]
    async fn state_set_get_delete_has() {
        let store = seeded_store();
        create_run(&store, "r1").await;
        let state = StateAccessor::new("r1", Arc::clone(&store));

        state.set("counter", &42u32).await.unwrap();
        assert!(state.has("counter").await);
        let got: u32 = state.get("counter").await.unwrap();
        assert_eq!(got, 42);

        state.delete("counter").await.unwrap();
        assert!(!state.has("counter").await);
        assert!(matches!(
            state.get::<u32>("counter").await.unwrap_err(),
            StepError::Store(StoreError::StateKeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn get_all_refreshes_cache() {
        let store = seeded_store();
        create_run(&store, "r1").await;
        store.save_state("r1", "a", b"1").await.unwrap();
        store.save_state("r1", "b", b"2").await.unwrap();

        let state = StateAccessor::new("r1", Arc::clone(&store));
        let all = state.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        let a: u32 = state.get("a").await.unwrap();
        assert_eq!(a, 1);
    }
}
