//! Steps: the typed unit of work.
//!
//! Steps are heterogeneous in their input/output types but homogeneous in
//! lifecycle, so the scheduler talks to the object-safe [`StepExecutor`]
//! trait while [`Step`] adapts a user-supplied typed handler into it by
//! JSON-encoding at the boundary. This keeps the executor type-agnostic
//! with no reflection on the hot path.

use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::StepContext;
use crate::errors::{BoxError, StepError};
use crate::types::{BackoffStrategy, ExecutionConfig};
use crate::validation::ValidationError;

/// Runtime predicate gating a conditional step. Evaluated with the same
/// context the handler would receive, so it may read state and prior
/// outputs.
pub type Condition =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;

type HandlerFn<I, O> =
    Arc<dyn Fn(StepContext, I) -> BoxFuture<'static, Result<O, BoxError>> + Send + Sync>;

type ValidatorFn<T> = Arc<dyn Fn(&T) -> Result<(), ValidationError> + Send + Sync>;

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// The polymorphic step interface the scheduler executes.
///
/// Implemented by [`Step`] (typed adapter) and
/// [`ConditionalStep`](crate::ConditionalStep) (decorator). Inputs and
/// outputs cross this boundary as UTF-8 JSON bytes.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn config(&self) -> &ExecutionConfig;

    /// Replace the step's config. Called once during workflow build for
    /// default-config inheritance.
    fn set_config(&mut self, config: ExecutionConfig);

    /// Decode, validate, run the handler, validate, encode.
    async fn execute(&self, ctx: StepContext, input: &[u8]) -> Result<Vec<u8>, StepError>;

    /// The gating predicate, if this step is conditional.
    fn condition(&self) -> Option<&Condition> {
        None
    }

    /// Output recorded when the condition is false: the configured default
    /// if present, otherwise the input passed through when the input and
    /// output types coincide, otherwise the output type's zero value.
    fn fallback_output(&self, input: &[u8]) -> Result<Vec<u8>, StepError>;
}

// ---------------------------------------------------------------------------
// Step — the typed adapter
// ---------------------------------------------------------------------------

/// A typed step: id, name, handler, and per-step policy.
///
/// ```no_run
/// use conveyor_engine::{Step, StepContext};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Default)]
/// struct Numbers { a: i64, b: i64 }
/// #[derive(Serialize, Deserialize, Default)]
/// struct Sum { sum: i64 }
///
/// let step = Step::new("sum", "Add numbers", |_ctx: StepContext, input: Numbers| async move {
///     Ok(Sum { sum: input.a + input.b })
/// })
/// .with_retries(2)
/// .with_timeout(std::time::Duration::from_secs(5));
/// ```
pub struct Step<I, O> {
    id: String,
    name: String,
    config: ExecutionConfig,
    validate: bool,
    input_validator: Option<ValidatorFn<I>>,
    output_validator: Option<ValidatorFn<O>>,
    handler: HandlerFn<I, O>,
}

impl<I, O> Step<I, O>
where
    I: DeserializeOwned + Serialize + Send + Sync + 'static,
    O: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    /// Create a step from a typed async handler.
    ///
    /// `id` must be non-empty and unique within a workflow.
    pub fn new<F, Fut>(id: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext, I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O, BoxError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            config: ExecutionConfig::default(),
            validate: true,
            input_validator: None,
            output_validator: None,
            handler: Arc::new(move |ctx, input| -> BoxFuture<'static, Result<O, BoxError>> {
                Box::pin(handler(ctx, input))
            }),
        }
    }

    /// Maximum retry attempts after the first.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Base delay fed into the backoff calculation.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Per-attempt deadline. Zero disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_seconds = timeout.as_secs();
        self
    }

    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.config.retry_backoff = strategy;
        self
    }

    /// Record a failure on this step but let the run proceed.
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.config.continue_on_error = continue_on_error;
        self
    }

    /// Replace the whole execution config.
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Disable constraint validation for this step. Decoding still happens.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Attach a custom input validator.
    pub fn with_input_validator(
        mut self,
        validator: impl Fn(&I) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.input_validator = Some(Arc::new(validator));
        self
    }

    /// Attach a custom output validator.
    pub fn with_output_validator(
        mut self,
        validator: impl Fn(&O) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.output_validator = Some(Arc::new(validator));
        self
    }

    /// Validate inputs through their [`validator::Validate`] derive.
    pub fn with_validated_input(self) -> Self
    where
        I: validator::Validate,
    {
        self.with_input_validator(|input: &I| input.validate().map_err(Into::into))
    }

    /// Validate outputs through their [`validator::Validate`] derive.
    pub fn with_validated_output(self) -> Self
    where
        O: validator::Validate,
    {
        self.with_output_validator(|output: &O| output.validate().map_err(Into::into))
    }

    /// Box the step for APIs taking heterogeneous step collections.
    pub fn boxed(self) -> Box<dyn StepExecutor> {
        Box::new(self)
    }
}

#[async_trait]
impl<I, O> StepExecutor for Step<I, O>
where
    I: DeserializeOwned + Serialize + Send + Sync + 'static,
    O: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn set_config(&mut self, config: ExecutionConfig) {
        self.config = config;
    }

    async fn execute(&self, ctx: StepContext, input: &[u8]) -> Result<Vec<u8>, StepError> {
        let decoded: I = serde_json::from_slice(input).map_err(|e| StepError::Handler {
            message: format!("failed to decode input for step {}: {e}", self.id),
        })?;
        if self.validate {
            if let Some(validator) = &self.input_validator {
                validator(&decoded)?;
            }
        }

        let output = (self.handler)(ctx, decoded)
            .await
            .map_err(|e| StepError::Handler {
                message: e.to_string(),
            })?;

        if self.validate {
            if let Some(validator) = &self.output_validator {
                validator(&output)?;
            }
        }
        serde_json::to_vec(&output).map_err(|e| StepError::Handler {
            message: format!("failed to encode output of step {}: {e}", self.id),
        })
    }

    fn fallback_output(&self, input: &[u8]) -> Result<Vec<u8>, StepError> {
        if TypeId::of::<I>() == TypeId::of::<O>() {
            return Ok(input.to_vec());
        }
        serde_json::to_vec(&O::default()).map_err(|e| StepError::Handler {
            message: format!("failed to encode default output of step {}: {e}", self.id),
        })
    }
}
