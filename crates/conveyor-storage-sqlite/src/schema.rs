//! Table and index definitions.

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_runs (
    run_id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    workflow_version TEXT NOT NULL,
    status TEXT NOT NULL,
    progress REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    input BLOB,
    output BLOB,
    error TEXT,
    resource_id TEXT,
    tags TEXT,
    context BLOB
);
CREATE INDEX IF NOT EXISTS idx_runs_workflow_status ON workflow_runs(workflow_id, status);
CREATE INDEX IF NOT EXISTS idx_runs_resource_status ON workflow_runs(resource_id, status);
CREATE INDEX IF NOT EXISTS idx_runs_updated_at ON workflow_runs(updated_at);
CREATE INDEX IF NOT EXISTS idx_runs_workflow_created ON workflow_runs(workflow_id, created_at);

CREATE TABLE IF NOT EXISTS step_executions (
    run_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    execution_index INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    duration_ms INTEGER,
    input BLOB,
    output BLOB,
    attempt INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    PRIMARY KEY (run_id, step_id)
);
CREATE INDEX IF NOT EXISTS idx_step_executions_run_index ON step_executions(run_id, execution_index);
CREATE INDEX IF NOT EXISTS idx_step_executions_status ON step_executions(status);

CREATE TABLE IF NOT EXISTS step_outputs (
    run_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    output_data BLOB,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (run_id, step_id)
);

CREATE TABLE IF NOT EXISTS workflow_state (
    run_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (run_id, key)
);
"#;
