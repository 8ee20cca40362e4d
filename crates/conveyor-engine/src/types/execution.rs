//! Run and step execution records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RunError;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// A terminal run never transitions again; only idempotent reads remain.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RunStatus::Pending),
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            "CANCELLED" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single step within a run.
///
/// `Retrying` is a transient label between attempts; the terminal statuses
/// are `Completed`, `Failed`, and `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Retrying => "RETRYING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(StepStatus::Pending),
            "RUNNING" => Some(StepStatus::Running),
            "COMPLETED" => Some(StepStatus::Completed),
            "FAILED" => Some(StepStatus::Failed),
            "SKIPPED" => Some(StepStatus::Skipped),
            "RETRYING" => Some(StepStatus::Retrying),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// One execution instance of a workflow.
///
/// `input`, `output`, and `context` are UTF-8 JSON bytes; the engine
/// serializes at the boundary so the record stays type-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_id: String,
    pub workflow_version: String,

    pub status: RunStatus,
    /// Fraction of steps that reached a terminal success, in `[0.0, 1.0]`.
    pub progress: f64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    pub input: Option<Vec<u8>>,
    /// Serialized output of the completed step with the highest
    /// execution index. Absent if no step completed.
    pub output: Option<Vec<u8>>,

    pub error: Option<RunError>,

    pub resource_id: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,

    /// Opaque user context, serialized once at start.
    pub context: Option<Vec<u8>>,
}

impl WorkflowRun {
    /// Deserialize the user context into a caller-chosen type.
    /// Returns `Ok(None)` when the run carries no context.
    pub fn context_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        self.context
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
    }

    /// Deserialize the run output. Returns `Ok(None)` when absent.
    pub fn output_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        self.output
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

/// Per-run record of a single step's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub run_id: String,
    pub step_id: String,
    /// Assigned in the order the scheduler begins each step. Unique within
    /// a run and strictly increasing in assignment time; the canonical
    /// listing order.
    pub execution_index: u32,

    pub status: StepStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set iff the status is terminal.
    pub duration_ms: Option<u64>,

    pub input: Option<Vec<u8>>,
    pub output: Option<Vec<u8>>,

    /// Zero-based attempt at the time the record was last written.
    pub attempt: u32,
    pub error: Option<RunError>,
}

impl StepExecution {
    /// Deserialize the recorded input.
    pub fn input_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        self.input.as_deref().map(serde_json::from_slice).transpose()
    }

    /// Deserialize the recorded output.
    pub fn output_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        self.output
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// RunFilter
// ---------------------------------------------------------------------------

/// Filter criteria for listing runs. Results are ordered by `created_at`
/// descending.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
    pub resource_id: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn step_status_terminality() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(!StepStatus::Retrying.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
    }

    #[test]
    fn status_parse_round_trip() {
        for s in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RunStatus::parse("UNKNOWN"), None);
    }

    #[test]
    fn context_as_deserializes() {
        let run = WorkflowRun {
            run_id: "r1".into(),
            workflow_id: "wf".into(),
            workflow_version: "1.0.0".into(),
            status: RunStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            updated_at: Utc::now(),
            input: None,
            output: None,
            error: None,
            resource_id: None,
            tags: None,
            context: Some(br#"{"tenant":"acme"}"#.to_vec()),
        };
        let ctx: Option<serde_json::Value> = run.context_as().unwrap();
        assert_eq!(ctx.unwrap()["tenant"], "acme");
    }
}
