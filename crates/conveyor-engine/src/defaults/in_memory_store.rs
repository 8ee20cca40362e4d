//! In-memory workflow store for testing and short-lived processes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::{RunError, StoreError};
use crate::traits::WorkflowStore;
use crate::types::{RunFilter, RunStatus, StepExecution, WorkflowRun};

/// In-memory implementation of [`WorkflowStore`].
///
/// Records are cloned on the way in and out, so callers never alias the
/// stored copy. Suitable for tests and ephemeral embedding; nothing
/// survives the process.
#[derive(Default)]
pub struct InMemoryStore {
    runs: RwLock<HashMap<String, WorkflowRun>>,
    /// run_id -> step_id -> execution
    step_executions: RwLock<HashMap<String, HashMap<String, StepExecution>>>,
    /// run_id -> step_id -> output bytes
    step_outputs: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
    /// run_id -> key -> value bytes
    state: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.run_id) {
            return Err(StoreError::other(format!(
                "workflow run {} already exists",
                run.run_id
            )));
        }
        runs.insert(run.run_id.clone(), run.clone());
        drop(runs);

        self.step_executions
            .write()
            .await
            .entry(run.run_id.clone())
            .or_default();
        self.step_outputs
            .write()
            .await
            .entry(run.run_id.clone())
            .or_default();
        self.state
            .write()
            .await
            .entry(run.run_id.clone())
            .or_default();
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, StoreError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if !runs.contains_key(&run.run_id) {
            return Err(StoreError::RunNotFound {
                run_id: run.run_id.clone(),
            });
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<RunError>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(run_id).ok_or_else(|| StoreError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        run.status = status;
        run.error = error;
        run.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let runs = self.runs.read().await;
        let mut matches: Vec<WorkflowRun> = runs
            .values()
            .filter(|run| {
                if let Some(workflow_id) = &filter.workflow_id {
                    if run.workflow_id != *workflow_id {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if run.status != status {
                        return false;
                    }
                }
                if let Some(resource_id) = &filter.resource_id {
                    if run.resource_id.as_deref() != Some(resource_id.as_str()) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn create_step_execution(&self, exec: &StepExecution) -> Result<(), StoreError> {
        self.step_executions
            .write()
            .await
            .entry(exec.run_id.clone())
            .or_default()
            .insert(exec.step_id.clone(), exec.clone());
        Ok(())
    }

    async fn get_step_execution(
        &self,
        run_id: &str,
        step_id: &str,
    ) -> Result<StepExecution, StoreError> {
        self.step_executions
            .read()
            .await
            .get(run_id)
            .and_then(|execs| execs.get(step_id))
            .cloned()
            .ok_or_else(|| StoreError::StepExecutionNotFound {
                run_id: run_id.to_string(),
                step_id: step_id.to_string(),
            })
    }

    async fn update_step_execution(&self, exec: &StepExecution) -> Result<(), StoreError> {
        let mut all = self.step_executions.write().await;
        let execs = all
            .get_mut(&exec.run_id)
            .ok_or_else(|| StoreError::StepExecutionNotFound {
                run_id: exec.run_id.clone(),
                step_id: exec.step_id.clone(),
            })?;
        execs.insert(exec.step_id.clone(), exec.clone());
        Ok(())
    }

    async fn list_step_executions(
        &self,
        run_id: &str,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let all = self.step_executions.read().await;
        let mut execs: Vec<StepExecution> = all
            .get(run_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        execs.sort_by_key(|e| e.execution_index);
        Ok(execs)
    }

    async fn save_step_output(
        &self,
        run_id: &str,
        step_id: &str,
        output: &[u8],
    ) -> Result<(), StoreError> {
        self.step_outputs
            .write()
            .await
            .entry(run_id.to_string())
            .or_default()
            .insert(step_id.to_string(), output.to_vec());
        Ok(())
    }

    async fn load_step_output(&self, run_id: &str, step_id: &str) -> Result<Vec<u8>, StoreError> {
        self.step_outputs
            .read()
            .await
            .get(run_id)
            .and_then(|outputs| outputs.get(step_id))
            .cloned()
            .ok_or_else(|| StoreError::StepOutputNotFound {
                run_id: run_id.to_string(),
                step_id: step_id.to_string(),
            })
    }

    async fn save_state(&self, run_id: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .entry(run_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn load_state(&self, run_id: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.state
            .read()
            .await
            .get(run_id)
            .and_then(|state| state.get(key))
            .cloned()
            .ok_or_else(|| StoreError::StateKeyNotFound {
                run_id: run_id.to_string(),
                key: key.to_string(),
            })
    }

    async fn delete_state(&self, run_id: &str, key: &str) -> Result<(), StoreError> {
        if let Some(state) = self.state.write().await.get_mut(run_id) {
            state.remove(key);
        }
        Ok(())
    }

    async fn get_all_state(
        &self,
        run_id: &str,
    ) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn count_runs_by_status(
        &self,
        resource_id: &str,
        status: RunStatus,
    ) -> Result<u64, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|run| {
                run.resource_id.as_deref() == Some(resource_id) && run.status == status
            })
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample_run(run_id: &str, workflow_id: &str) -> WorkflowRun {
        let now = Utc::now();
        WorkflowRun {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            workflow_version: "1.0.0".into(),
            status: RunStatus::Pending,
            progress: 0.0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            input: Some(br#"{"a":10,"b":5}"#.to_vec()),
            output: None,
            error: None,
            resource_id: Some("resource-1".into()),
            tags: None,
            context: None,
        }
    }

    #[tokio::test]
    async fn run_round_trip_is_equal() {
        let store = InMemoryStore::new();
        let run = sample_run("r1", "wf");
        store.create_run(&run).await.unwrap();
        let loaded = store.get_run("r1").await.unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn create_duplicate_run_fails() {
        let store = InMemoryStore::new();
        let run = sample_run("r1", "wf");
        store.create_run(&run).await.unwrap();
        assert!(store.create_run(&run).await.is_err());
    }

    #[tokio::test]
    async fn get_missing_run_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_run("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn list_runs_orders_by_created_at_desc_and_limits() {
        let store = InMemoryStore::new();
        let base = Utc::now();
        for i in 0..3 {
            let mut run = sample_run(&format!("r{i}"), "wf");
            run.created_at = base + Duration::seconds(i);
            store.create_run(&run).await.unwrap();
        }
        let listed = store
            .list_runs(&RunFilter {
                workflow_id: Some("wf".into()),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].run_id, "r2");
        assert_eq!(listed[2].run_id, "r0");

        let limited = store
            .list_runs(&RunFilter {
                limit: Some(2),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].run_id, "r2");
    }

    #[tokio::test]
    async fn list_runs_filters_by_status_and_resource() {
        let store = InMemoryStore::new();
        let mut completed = sample_run("done", "wf");
        completed.status = RunStatus::Completed;
        store.create_run(&completed).await.unwrap();

        let mut other = sample_run("other", "wf");
        other.resource_id = Some("resource-2".into());
        store.create_run(&other).await.unwrap();

        let by_status = store
            .list_runs(&RunFilter {
                status: Some(RunStatus::Completed),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].run_id, "done");

        let by_resource = store
            .list_runs(&RunFilter {
                resource_id: Some("resource-2".into()),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_resource.len(), 1);
        assert_eq!(by_resource[0].run_id, "other");
    }

    #[tokio::test]
    async fn update_run_status_sets_error() {
        let store = InMemoryStore::new();
        store.create_run(&sample_run("r1", "wf")).await.unwrap();
        store
            .update_run_status(
                "r1",
                RunStatus::Failed,
                Some(RunError::new(
                    crate::errors::ErrorKind::Handler,
                    "intentional failure",
                )),
            )
            .await
            .unwrap();
        let run = store.get_run("r1").await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().message, "intentional failure");
    }

    #[tokio::test]
    async fn step_output_bytes_round_trip_identically() {
        let store = InMemoryStore::new();
        store.create_run(&sample_run("r1", "wf")).await.unwrap();
        let payload = br#"{"sum":15}"#.to_vec();
        store.save_step_output("r1", "sum", &payload).await.unwrap();
        assert_eq!(store.load_step_output("r1", "sum").await.unwrap(), payload);

        // Upsert replaces.
        store.save_step_output("r1", "sum", b"{}").await.unwrap();
        assert_eq!(store.load_step_output("r1", "sum").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn state_delete_then_load_is_not_found() {
        let store = InMemoryStore::new();
        store.create_run(&sample_run("r1", "wf")).await.unwrap();
        store.save_state("r1", "k", b"1").await.unwrap();
        store.delete_state("r1", "k").await.unwrap();
        assert!(matches!(
            store.load_state("r1", "k").await.unwrap_err(),
            StoreError::StateKeyNotFound { .. }
        ));
        // Deleting a missing key stays quiet.
        store.delete_state("r1", "k").await.unwrap();
    }

    #[tokio::test]
    async fn count_runs_by_status_scopes_to_resource() {
        let store = InMemoryStore::new();
        let mut a = sample_run("a", "wf");
        a.status = RunStatus::Running;
        store.create_run(&a).await.unwrap();
        let mut b = sample_run("b", "wf");
        b.status = RunStatus::Running;
        b.resource_id = Some("resource-2".into());
        store.create_run(&b).await.unwrap();

        let count = store
            .count_runs_by_status("resource-1", RunStatus::Running)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn mutating_a_fetched_run_does_not_alias_the_stored_copy() {
        let store = InMemoryStore::new();
        store.create_run(&sample_run("r1", "wf")).await.unwrap();
        let mut fetched = store.get_run("r1").await.unwrap();
        fetched.status = RunStatus::Failed;
        assert_eq!(
            store.get_run("r1").await.unwrap().status,
            RunStatus::Pending
        );
    }
}
