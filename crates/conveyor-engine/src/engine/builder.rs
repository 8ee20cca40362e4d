//! Engine assembly.

use std::sync::Arc;
use std::time::Duration;

use super::Engine;
use crate::defaults::InMemoryStore;
use crate::traits::WorkflowStore;
use crate::types::EngineConfig;

/// Builder for [`Engine`]. Every field is optional — defaults are an
/// in-memory store and [`EngineConfig::default`].
pub struct EngineBuilder {
    store: Option<Arc<dyn WorkflowStore>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub(super) fn new() -> Self {
        Self {
            store: None,
            config: EngineConfig::default(),
        }
    }

    /// Set the store backing runs, step executions, outputs, and state.
    pub fn store(mut self, store: impl WorkflowStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set an already-shared store.
    pub fn shared_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound on simultaneously-driving runs.
    pub fn max_concurrent_workflows(mut self, limit: usize) -> Self {
        self.config.max_concurrent_workflows = limit;
        self
    }

    /// Total wall-time budget per run; exceeding it cancels the run.
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.config.run_timeout = timeout;
        self
    }

    pub fn build(self) -> Engine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        Engine::from_parts(store, self.config)
    }
}
