//! `WorkflowStore` over a rusqlite connection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use conveyor_engine::{
    RunError, RunFilter, RunStatus, StepExecution, StepStatus, StoreError, WorkflowRun,
    WorkflowStore,
};

use crate::schema::SCHEMA;

/// SQLite-backed workflow store.
///
/// A single connection behind a mutex; calls are short and synchronous, so
/// contention stays negligible for embedded use. WAL mode keeps readers
/// unblocked by writers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::other(format!("failed to create db directory: {e}")))?;
        }
        let conn = Connection::open(path).map_err(StoreError::other)?;
        Self::init(conn)
    }

    /// An in-memory database, for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::other)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(StoreError::other)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::other)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::other("connection mutex poisoned"))
    }
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn conversion_error(err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

fn bad_value(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, message.into())
}

fn ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_error)
}

fn opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(ts).transpose()
}

fn opt_json<T: DeserializeOwned>(s: Option<String>) -> rusqlite::Result<Option<T>> {
    s.map(|raw| serde_json::from_str(&raw).map_err(conversion_error))
        .transpose()
}

fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(StoreError::other))
        .transpose()
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowRun> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(WorkflowRun {
        run_id: row.get("run_id")?,
        workflow_id: row.get("workflow_id")?,
        workflow_version: row.get("workflow_version")?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| bad_value(format!("unknown run status: {status}")))?,
        progress: row.get("progress")?,
        created_at: ts(&created_at)?,
        started_at: opt_ts(row.get("started_at")?)?,
        completed_at: opt_ts(row.get("completed_at")?)?,
        updated_at: ts(&updated_at)?,
        input: row.get("input")?,
        output: row.get("output")?,
        error: opt_json::<RunError>(row.get("error")?)?,
        resource_id: row.get("resource_id")?,
        tags: opt_json(row.get("tags")?)?,
        context: row.get("context")?,
    })
}

fn exec_from_row(row: &Row<'_>) -> rusqlite::Result<StepExecution> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let execution_index: i64 = row.get("execution_index")?;
    let attempt: i64 = row.get("attempt")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;
    Ok(StepExecution {
        run_id: row.get("run_id")?,
        step_id: row.get("step_id")?,
        execution_index: execution_index as u32,
        status: StepStatus::parse(&status)
            .ok_or_else(|| bad_value(format!("unknown step status: {status}")))?,
        created_at: ts(&created_at)?,
        updated_at: ts(&updated_at)?,
        started_at: opt_ts(row.get("started_at")?)?,
        completed_at: opt_ts(row.get("completed_at")?)?,
        duration_ms: duration_ms.map(|d| d.max(0) as u64),
        input: row.get("input")?,
        output: row.get("output")?,
        attempt: attempt as u32,
        error: opt_json::<RunError>(row.get("error")?)?,
    })
}

const RUN_COLUMNS: &str = "run_id, workflow_id, workflow_version, status, progress, created_at, \
     started_at, completed_at, updated_at, input, output, error, resource_id, tags, context";

const EXEC_COLUMNS: &str = "run_id, step_id, execution_index, status, created_at, updated_at, \
     started_at, completed_at, duration_ms, input, output, attempt, error";

// ---------------------------------------------------------------------------
// WorkflowStore
// ---------------------------------------------------------------------------

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let error = to_json(&run.error)?;
        let tags = to_json(&run.tags)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflow_runs (run_id, workflow_id, workflow_version, status, progress, \
             created_at, started_at, completed_at, updated_at, input, output, error, resource_id, \
             tags, context) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                run.run_id,
                run.workflow_id,
                run.workflow_version,
                run.status.as_str(),
                run.progress,
                run.created_at.to_rfc3339(),
                run.started_at.map(|t| t.to_rfc3339()),
                run.completed_at.map(|t| t.to_rfc3339()),
                run.updated_at.to_rfc3339(),
                run.input,
                run.output,
                error,
                run.resource_id,
                tags,
                run.context,
            ],
        )
        .map_err(StoreError::other)?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE run_id = ?1"),
            params![run_id],
            run_from_row,
        )
        .optional()
        .map_err(StoreError::other)?
        .ok_or_else(|| StoreError::RunNotFound {
            run_id: run_id.to_string(),
        })
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let error = to_json(&run.error)?;
        let tags = to_json(&run.tags)?;
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE workflow_runs SET workflow_id = ?2, workflow_version = ?3, status = ?4, \
                 progress = ?5, created_at = ?6, started_at = ?7, completed_at = ?8, \
                 updated_at = ?9, input = ?10, output = ?11, error = ?12, resource_id = ?13, \
                 tags = ?14, context = ?15 \
                 WHERE run_id = ?1",
                params![
                    run.run_id,
                    run.workflow_id,
                    run.workflow_version,
                    run.status.as_str(),
                    run.progress,
                    run.created_at.to_rfc3339(),
                    run.started_at.map(|t| t.to_rfc3339()),
                    run.completed_at.map(|t| t.to_rfc3339()),
                    run.updated_at.to_rfc3339(),
                    run.input,
                    run.output,
                    error,
                    run.resource_id,
                    tags,
                    run.context,
                ],
            )
            .map_err(StoreError::other)?;
        if affected == 0 {
            return Err(StoreError::RunNotFound {
                run_id: run.run_id.clone(),
            });
        }
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<RunError>,
    ) -> Result<(), StoreError> {
        let error = to_json(&error)?;
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE workflow_runs SET status = ?2, error = ?3, updated_at = ?4 \
                 WHERE run_id = ?1",
                params![run_id, status.as_str(), error, Utc::now().to_rfc3339()],
            )
            .map_err(StoreError::other)?;
        if affected == 0 {
            return Err(StoreError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut sql = format!("SELECT {RUN_COLUMNS} FROM workflow_runs");
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(workflow_id) = &filter.workflow_id {
            clauses.push("workflow_id = ?");
            values.push(Box::new(workflow_id.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(resource_id) = &filter.resource_id {
            clauses.push("resource_id = ?");
            values.push(Box::new(resource_id.clone()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Box::new(limit as i64));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(StoreError::other)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt
            .query_map(&param_refs[..], run_from_row)
            .map_err(StoreError::other)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::other)
    }

    async fn create_step_execution(&self, exec: &StepExecution) -> Result<(), StoreError> {
        let error = to_json(&exec.error)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO step_executions (run_id, step_id, execution_index, status, \
             created_at, updated_at, started_at, completed_at, duration_ms, input, output, \
             attempt, error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                exec.run_id,
                exec.step_id,
                i64::from(exec.execution_index),
                exec.status.as_str(),
                exec.created_at.to_rfc3339(),
                exec.updated_at.to_rfc3339(),
                exec.started_at.map(|t| t.to_rfc3339()),
                exec.completed_at.map(|t| t.to_rfc3339()),
                exec.duration_ms.map(|d| d as i64),
                exec.input,
                exec.output,
                i64::from(exec.attempt),
                error,
            ],
        )
        .map_err(StoreError::other)?;
        Ok(())
    }

    async fn get_step_execution(
        &self,
        run_id: &str,
        step_id: &str,
    ) -> Result<StepExecution, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {EXEC_COLUMNS} FROM step_executions WHERE run_id = ?1 AND step_id = ?2"
            ),
            params![run_id, step_id],
            exec_from_row,
        )
        .optional()
        .map_err(StoreError::other)?
        .ok_or_else(|| StoreError::StepExecutionNotFound {
            run_id: run_id.to_string(),
            step_id: step_id.to_string(),
        })
    }

    async fn update_step_execution(&self, exec: &StepExecution) -> Result<(), StoreError> {
        let error = to_json(&exec.error)?;
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE step_executions SET execution_index = ?3, status = ?4, created_at = ?5, \
                 updated_at = ?6, started_at = ?7, completed_at = ?8, duration_ms = ?9, \
                 input = ?10, output = ?11, attempt = ?12, error = ?13 \
                 WHERE run_id = ?1 AND step_id = ?2",
                params![
                    exec.run_id,
                    exec.step_id,
                    i64::from(exec.execution_index),
                    exec.status.as_str(),
                    exec.created_at.to_rfc3339(),
                    exec.updated_at.to_rfc3339(),
                    exec.started_at.map(|t| t.to_rfc3339()),
                    exec.completed_at.map(|t| t.to_rfc3339()),
                    exec.duration_ms.map(|d| d as i64),
                    exec.input,
                    exec.output,
                    i64::from(exec.attempt),
                    error,
                ],
            )
            .map_err(StoreError::other)?;
        if affected == 0 {
            return Err(StoreError::StepExecutionNotFound {
                run_id: exec.run_id.clone(),
                step_id: exec.step_id.clone(),
            });
        }
        Ok(())
    }

    async fn list_step_executions(
        &self,
        run_id: &str,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXEC_COLUMNS} FROM step_executions WHERE run_id = ?1 \
                 ORDER BY execution_index ASC"
            ))
            .map_err(StoreError::other)?;
        let rows = stmt
            .query_map(params![run_id], exec_from_row)
            .map_err(StoreError::other)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::other)
    }

    async fn save_step_output(
        &self,
        run_id: &str,
        step_id: &str,
        output: &[u8],
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO step_outputs (run_id, step_id, output_data, created_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(run_id, step_id) DO UPDATE SET output_data = excluded.output_data",
            params![run_id, step_id, output, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::other)?;
        Ok(())
    }

    async fn load_step_output(&self, run_id: &str, step_id: &str) -> Result<Vec<u8>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT output_data FROM step_outputs WHERE run_id = ?1 AND step_id = ?2",
            params![run_id, step_id],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(StoreError::other)?
        .ok_or_else(|| StoreError::StepOutputNotFound {
            run_id: run_id.to_string(),
            step_id: step_id.to_string(),
        })
    }

    async fn save_state(&self, run_id: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflow_state (run_id, key, value, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(run_id, key) DO UPDATE SET value = excluded.value, \
             updated_at = excluded.updated_at",
            params![run_id, key, value, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::other)?;
        Ok(())
    }

    async fn load_state(&self, run_id: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM workflow_state WHERE run_id = ?1 AND key = ?2",
            params![run_id, key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(StoreError::other)?
        .ok_or_else(|| StoreError::StateKeyNotFound {
            run_id: run_id.to_string(),
            key: key.to_string(),
        })
    }

    async fn delete_state(&self, run_id: &str, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM workflow_state WHERE run_id = ?1 AND key = ?2",
            params![run_id, key],
        )
        .map_err(StoreError::other)?;
        Ok(())
    }

    async fn get_all_state(
        &self,
        run_id: &str,
    ) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM workflow_state WHERE run_id = ?1")
            .map_err(StoreError::other)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(StoreError::other)?;
        rows.collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(StoreError::other)
    }

    async fn count_runs_by_status(
        &self,
        resource_id: &str,
        status: RunStatus,
    ) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM workflow_runs WHERE resource_id = ?1 AND status = ?2",
                params![resource_id, status.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::other)?;
        Ok(count.max(0) as u64)
    }
}
