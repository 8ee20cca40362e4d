//! Embedded-SQLite [`WorkflowStore`](conveyor_engine::WorkflowStore).
//!
//! Four tables mirror the engine's logical collections: `workflow_runs`,
//! `step_executions`, `step_outputs`, and `workflow_state`. Inputs,
//! outputs, and state values are stored as BLOBs of UTF-8 JSON; errors and
//! tags as JSON text. Step executions index on `(run_id,
//! execution_index)` for ordered listing, runs on the filter columns.

mod schema;
mod store;

pub use store::SqliteStore;
