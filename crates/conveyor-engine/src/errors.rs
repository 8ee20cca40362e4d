//! Error types for graph construction, step execution, persistence, and
//! the public engine API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationError;

/// Boxed error returned by user-supplied handlers and conditions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// GraphError
// ---------------------------------------------------------------------------

/// Build-time invariant violations. These are fatal to
/// [`WorkflowBuilder::build`](crate::WorkflowBuilder::build) and never
/// occur at runtime.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph has no steps")]
    Empty,
    #[error("step id must be non-empty")]
    EmptyStepId,
    #[error("duplicate step id: {step_id}")]
    DuplicateStep { step_id: String },
    #[error("unknown step id: {step_id}")]
    UnknownStep { step_id: String },
    #[error("cycle detected involving step {step_id}")]
    Cycle { step_id: String },
    #[error("no entry point: every step has at least one predecessor")]
    NoEntryPoint,
    #[error("ambiguous entry point, candidates: {candidates:?}")]
    AmbiguousEntryPoint { candidates: Vec<String> },
    #[error("step {step_id} is not reachable from the entry point")]
    Unreachable { step_id: String },
    #[error("step {step_id} referenced by the graph is not registered")]
    MissingStep { step_id: String },
    #[error("workflow context serialization failed: {message}")]
    Context { message: String },
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Persistence layer outcomes. Each entity gets a dedicated not-found
/// variant; everything else is an opaque store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow run not found: {run_id}")]
    RunNotFound { run_id: String },
    #[error("step execution not found: {run_id}/{step_id}")]
    StepExecutionNotFound { run_id: String, step_id: String },
    #[error("step output not found: {run_id}/{step_id}")]
    StepOutputNotFound { run_id: String, step_id: String },
    #[error("state key not found: {run_id}/{key}")]
    StateKeyNotFound { run_id: String, key: String },
    #[error("store error: {message}")]
    Store { message: String },
}

impl StoreError {
    /// Wrap an arbitrary backend failure.
    pub fn other(message: impl std::fmt::Display) -> Self {
        StoreError::Store {
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        !matches!(self, StoreError::Store { .. })
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// A single step attempt's failure. Per-attempt errors are retry
/// candidates; after exhaustion the error is attached to the step
/// execution and, unless the step continues on error, escalated to the run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("handler error: {message}")]
    Handler { message: String },
    #[error("attempt deadline exceeded after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },
    #[error("run cancelled")]
    Cancelled,
    #[error("condition evaluation failed: {message}")]
    Condition { message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StepError {
    pub fn handler(err: impl std::fmt::Display) -> Self {
        StepError::Handler {
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Validation(_) => ErrorKind::Validation,
            StepError::Handler { .. } => ErrorKind::Handler,
            StepError::Timeout { .. } => ErrorKind::Timeout,
            StepError::Cancelled => ErrorKind::Cancelled,
            StepError::Condition { .. } => ErrorKind::Condition,
            StepError::Store(e) => {
                if e.is_not_found() {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::Store
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted error form
// ---------------------------------------------------------------------------

/// Error classification carried on persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Handler,
    Timeout,
    Cancelled,
    Condition,
    Store,
    NotFound,
    Graph,
}

/// The user-visible failure attached to runs and step executions:
/// kind + message + optional structured details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, serde_json::Value>>,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }
}

impl From<&StepError> for RunError {
    fn from(err: &StepError) -> Self {
        let mut run_error = RunError::new(err.kind(), err.to_string());
        if let StepError::Validation(v) = err {
            if let Ok(violations) = serde_json::to_value(&v.violations) {
                run_error.details =
                    Some(BTreeMap::from([("violations".to_string(), violations)]));
            }
        }
        run_error
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced by the public [`Engine`](crate::Engine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
