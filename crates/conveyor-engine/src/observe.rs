//! Structured lifecycle events.
//!
//! Event names are stable contract; field names stay uniform because every
//! emission goes through this module. Enrichment (run/step spans layered
//! on by embedders) is additive only.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::{RunError, StoreError};

// Workflow-level events.
pub const WORKFLOW_CREATED: &str = "workflow_created";
pub const WORKFLOW_STARTED: &str = "workflow_started";
pub const WORKFLOW_PROGRESS: &str = "workflow_progress";
pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
pub const WORKFLOW_FAILED: &str = "workflow_failed";
pub const WORKFLOW_CANCELLED: &str = "workflow_cancelled";

// Step-level events.
pub const STEP_STARTED: &str = "step_started";
pub const STEP_RETRYING: &str = "step_retrying";
pub const STEP_COMPLETED: &str = "step_completed";
pub const STEP_FAILED: &str = "step_failed";
pub const STEP_SKIPPED: &str = "step_skipped";

// Persistence events.
pub const PERSISTENCE_ERROR: &str = "persistence_error";

pub fn workflow_created(run_id: &str, workflow_id: &str, resource_id: Option<&str>) {
    info!(
        event = WORKFLOW_CREATED,
        run_id,
        workflow_id,
        resource_id = resource_id.unwrap_or_default(),
        "workflow run created"
    );
}

pub fn workflow_started(run_id: &str, workflow_id: &str, resource_id: Option<&str>) {
    info!(
        event = WORKFLOW_STARTED,
        run_id,
        workflow_id,
        resource_id = resource_id.unwrap_or_default(),
        "workflow started"
    );
}

pub fn workflow_progress(run_id: &str, progress: f64) {
    debug!(
        event = WORKFLOW_PROGRESS,
        run_id, progress, "workflow progress updated"
    );
}

pub fn workflow_completed(run_id: &str, duration: Duration) {
    info!(
        event = WORKFLOW_COMPLETED,
        run_id,
        duration_ms = duration.as_millis() as u64,
        "workflow completed"
    );
}

pub fn workflow_failed(run_id: &str, error: &RunError) {
    error!(
        event = WORKFLOW_FAILED,
        run_id,
        error = %error,
        "workflow failed"
    );
}

pub fn workflow_cancelled(run_id: &str) {
    warn!(event = WORKFLOW_CANCELLED, run_id, "workflow cancelled");
}

pub fn step_started(
    run_id: &str,
    step_id: &str,
    step_name: &str,
    step_num: usize,
    total_steps: usize,
) {
    info!(
        event = STEP_STARTED,
        run_id, step_id, step_name, step_num, total_steps, "step started"
    );
}

pub fn step_retrying(run_id: &str, step_id: &str, attempt: u32, delay: Duration) {
    warn!(
        event = STEP_RETRYING,
        run_id,
        step_id,
        attempt,
        delay_ms = delay.as_millis() as u64,
        "step retrying"
    );
}

pub fn step_completed(run_id: &str, step_id: &str, duration_ms: u64, attempts: u32) {
    info!(
        event = STEP_COMPLETED,
        run_id, step_id, duration_ms, attempts, "step completed"
    );
}

pub fn step_failed(
    run_id: &str,
    step_id: &str,
    error: &dyn std::fmt::Display,
    attempt: u32,
    duration_ms: u64,
) {
    error!(
        event = STEP_FAILED,
        run_id,
        step_id,
        error = %error,
        attempt,
        duration_ms,
        "step failed"
    );
}

pub fn step_skipped(run_id: &str, step_id: &str, reason: &str) {
    info!(
        event = STEP_SKIPPED,
        run_id, step_id, reason, "step skipped"
    );
}

pub fn persistence_error(run_id: &str, operation: &str, error: &StoreError) {
    error!(
        event = PERSISTENCE_ERROR,
        run_id,
        operation,
        error = %error,
        "persistence error"
    );
}
