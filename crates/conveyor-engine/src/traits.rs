//! The persistence contract.
//!
//! Concrete stores live elsewhere (an in-memory store ships in
//! [`defaults`](crate::defaults); an embedded-SQLite store in its own
//! crate). The engine assumes each call is atomic on its own but never
//! assumes multi-call transactions: state may be momentarily inconsistent
//! between calls (e.g. a step output persisted before the step execution
//! status update lands), and readers must tolerate that.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::{RunError, StoreError};
use crate::types::{RunFilter, RunStatus, StepExecution, WorkflowRun};

/// Persistence for runs, step executions, step outputs, and run-scoped
/// state. All byte payloads are UTF-8 JSON.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // -- Runs ---------------------------------------------------------------

    /// Create a new run record. Fails if the run id already exists.
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, StoreError>;

    /// Whole-record update of an existing run.
    async fn update_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Update only status and error.
    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<RunError>,
    ) -> Result<(), StoreError>;

    /// List runs matching the filter, ordered by `created_at` descending.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError>;

    // -- Step executions ----------------------------------------------------

    async fn create_step_execution(&self, exec: &StepExecution) -> Result<(), StoreError>;

    async fn get_step_execution(
        &self,
        run_id: &str,
        step_id: &str,
    ) -> Result<StepExecution, StoreError>;

    async fn update_step_execution(&self, exec: &StepExecution) -> Result<(), StoreError>;

    /// List a run's step executions ordered by `execution_index` ascending.
    async fn list_step_executions(&self, run_id: &str) -> Result<Vec<StepExecution>, StoreError>;

    // -- Step outputs -------------------------------------------------------

    /// Upsert the current output for `(run_id, step_id)`.
    async fn save_step_output(
        &self,
        run_id: &str,
        step_id: &str,
        output: &[u8],
    ) -> Result<(), StoreError>;

    async fn load_step_output(&self, run_id: &str, step_id: &str) -> Result<Vec<u8>, StoreError>;

    // -- Run-scoped state ---------------------------------------------------

    async fn save_state(&self, run_id: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

    async fn load_state(&self, run_id: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete a state key. Deleting a missing key is not an error.
    async fn delete_state(&self, run_id: &str, key: &str) -> Result<(), StoreError>;

    async fn get_all_state(&self, run_id: &str)
        -> Result<HashMap<String, Vec<u8>>, StoreError>;

    // -- Queries ------------------------------------------------------------

    async fn count_runs_by_status(
        &self,
        resource_id: &str,
        status: RunStatus,
    ) -> Result<u64, StoreError>;
}
