//! Step- and engine-level execution configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Retry backoff strategy between step attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackoffStrategy {
    /// No delay between attempts.
    None,
    /// `base * attempt`.
    #[default]
    Linear,
    /// `base * 2^(attempt - 1)`.
    Exponential,
}

impl BackoffStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            BackoffStrategy::None => "NONE",
            BackoffStrategy::Linear => "LINEAR",
            BackoffStrategy::Exponential => "EXPONENTIAL",
        }
    }

    /// Parse a strategy name. Unrecognized names fall back to [`Linear`],
    /// which keeps records written by newer versions readable.
    ///
    /// [`Linear`]: BackoffStrategy::Linear
    pub fn parse(s: &str) -> Self {
        match s {
            "NONE" => BackoffStrategy::None,
            "EXPONENTIAL" => BackoffStrategy::Exponential,
            _ => BackoffStrategy::Linear,
        }
    }
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BackoffStrategy {
    /// Deserialize through [`parse`](Self::parse) so strategy names written
    /// by newer versions read back as `Linear` instead of erroring.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(BackoffStrategy::parse(&name))
    }
}

// ---------------------------------------------------------------------------
// ExecutionConfig
// ---------------------------------------------------------------------------

/// Per-step execution policy.
///
/// Every step owns a config. Steps still carrying the default config when
/// the workflow is built inherit the workflow-level default instead; a step
/// configured explicitly keeps its own settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum retry attempts after the first. Total attempts = 1 + max_retries.
    pub max_retries: u32,
    /// Base delay fed into the backoff calculation.
    pub retry_delay_ms: u64,
    pub retry_backoff: BackoffStrategy,
    /// Per-attempt deadline in seconds. Zero disables the deadline.
    pub timeout_seconds: u64,
    /// Reserved for parallel schedulers.
    pub max_concurrency: u32,
    /// When true, a failed step is recorded but the run proceeds.
    pub continue_on_error: bool,
    /// Reserved. Ignored by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_step_id: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            retry_backoff: BackoffStrategy::Linear,
            timeout_seconds: 30,
            max_concurrency: 1,
            continue_on_error: false,
            fallback_step_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Engine-level resource policy.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on simultaneously-driving runs. Excess asynchronous
    /// starts block until a slot frees.
    pub max_concurrent_workflows: usize,
    /// Total wall-time budget for a single run. Exceeding it cancels the
    /// run cooperatively.
    pub run_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            run_timeout: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// StartOptions
// ---------------------------------------------------------------------------

/// Options recognized by [`Engine::start_workflow`](crate::Engine::start_workflow).
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub(crate) synchronous: bool,
    pub(crate) resource_id: Option<String>,
    pub(crate) tags: Option<BTreeMap<String, String>>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the run reaches a terminal status instead of returning
    /// after the run record is created.
    pub fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Merge a tag into the run's tags.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.get_or_insert_with(BTreeMap::new).extend(tags);
        self
    }
}
