//! Conditional gating as a step decorator.
//!
//! Wrapping rather than a separate entity type keeps the executor's state
//! machine uniform and lets the condition itself suspend (read state or
//! prior outputs). When the condition is false the step still reaches
//! COMPLETED — recording the absence of failure, not of execution — so
//! downstream dependencies stay satisfied and their input resolution keeps
//! working.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::StepContext;
use crate::errors::{BoxError, StepError};
use crate::step::{Condition, StepExecutor};
use crate::types::ExecutionConfig;

/// A step whose handler runs only when a runtime predicate is true.
///
/// When false, the recorded output is the configured default value if
/// present, otherwise the inner step's pass-through/zero-value fallback.
pub struct ConditionalStep {
    inner: Box<dyn StepExecutor>,
    condition: Condition,
    default_value: Option<Value>,
}

impl ConditionalStep {
    pub fn new<F, Fut>(inner: impl StepExecutor + 'static, condition: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        Self {
            inner: Box::new(inner),
            condition: Arc::new(
                move |ctx| -> futures::future::BoxFuture<'static, Result<bool, BoxError>> {
                    Box::pin(condition(ctx))
                },
            ),
            default_value: None,
        }
    }

    /// Output to record when the condition is false.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn boxed(self) -> Box<dyn StepExecutor> {
        Box::new(self)
    }
}

#[async_trait]
impl StepExecutor for ConditionalStep {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn config(&self) -> &ExecutionConfig {
        self.inner.config()
    }

    fn set_config(&mut self, config: ExecutionConfig) {
        self.inner.set_config(config);
    }

    async fn execute(&self, ctx: StepContext, input: &[u8]) -> Result<Vec<u8>, StepError> {
        self.inner.execute(ctx, input).await
    }

    fn condition(&self) -> Option<&Condition> {
        Some(&self.condition)
    }

    fn fallback_output(&self, input: &[u8]) -> Result<Vec<u8>, StepError> {
        match &self.default_value {
            Some(value) => serde_json::to_vec(value).map_err(|e| StepError::Handler {
                message: format!("failed to encode default value of step {}: {e}", self.id()),
            }),
            None => self.inner.fallback_output(input),
        }
    }
}
