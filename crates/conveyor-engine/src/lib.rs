//! Conveyor — durable, type-disciplined workflow orchestration.
//!
//! A workflow is a DAG of typed steps. Each run is persisted through a
//! pluggable store so progress, step outputs, and intermediate state
//! survive crashes and stay inspectable after the fact. The engine drives
//! a validated graph in deterministic topological order with per-step
//! retry/backoff/timeout policies, conditional gating, cooperative
//! cancellation, and structured lifecycle events.
//!
//! ```no_run
//! use std::sync::Arc;
//! use conveyor_engine::{Engine, StartOptions, Step, StepContext, WorkflowBuilder};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Default)]
//! struct Numbers { a: i64, b: i64 }
//! #[derive(Serialize, Deserialize, Default)]
//! struct Sum { sum: i64 }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let workflow = Arc::new(
//!     WorkflowBuilder::new("math", "Math pipeline")
//!         .then_step(Step::new("sum", "Add", |_ctx: StepContext, n: Numbers| async move {
//!             Ok(Sum { sum: n.a + n.b })
//!         }))
//!         .build()?,
//! );
//!
//! let engine = Engine::builder().build();
//! let run_id = engine
//!     .start_workflow(workflow, &Numbers { a: 10, b: 5 }, StartOptions::new().synchronous())
//!     .await?;
//! let run = engine.get_run(&run_id).await?;
//! assert!(run.status.is_terminal());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod builder;
pub mod conditional;
pub mod context;
pub mod defaults;
pub mod engine;
pub mod errors;
mod executor;
pub mod graph;
pub mod observe;
pub mod step;
pub mod traits;
pub mod types;
pub mod validation;
mod workflow;

// Re-export the public surface at the crate level.

// backoff
pub use backoff::backoff_delay;

// builder / workflow
pub use builder::WorkflowBuilder;
pub use workflow::Workflow;

// steps
pub use conditional::ConditionalStep;
pub use step::{Condition, Step, StepExecutor};

// context
pub use context::{CancelToken, StateAccessor, StepContext, StepDataAccessor};

// defaults
pub use defaults::InMemoryStore;

// engine
pub use engine::{Engine, EngineBuilder};

// errors
pub use errors::{
    BoxError, EngineError, ErrorKind, GraphError, RunError, StepError, StoreError,
};

// graph
pub use graph::{NodeKind, StepGraph};

// traits
pub use traits::WorkflowStore;

// types
pub use types::{
    BackoffStrategy, EngineConfig, ExecutionConfig, RunFilter, RunStatus, StartOptions,
    StepExecution, StepStatus, WorkflowRun,
};

// validation
pub use validation::{FieldViolation, ValidationError};
