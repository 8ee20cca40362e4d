//! Fluent DAG construction.
//!
//! The builder keeps a frontier — the set of step ids the next appended
//! step connects from. `then_step` collapses the frontier to one step,
//! `parallel` widens it. `build` validates the graph, propagates the
//! workflow default config onto steps still carrying the sentinel default,
//! and freezes the result.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::conditional::ConditionalStep;
use crate::errors::{BoxError, GraphError};
use crate::graph::{NodeKind, StepGraph};
use crate::step::StepExecutor;
use crate::types::ExecutionConfig;
use crate::workflow::Workflow;

/// Builds a [`Workflow`] step by step.
///
/// Graph mistakes (duplicate ids, cycles, dangling entry points) are
/// collected and reported by [`build`](Self::build) — the fluent chain
/// itself never fails.
pub struct WorkflowBuilder {
    id: String,
    name: String,
    version: String,
    description: Option<String>,
    tags: Option<BTreeMap<String, String>>,
    config: ExecutionConfig,
    context: Option<Vec<u8>>,
    steps: HashMap<String, Box<dyn StepExecutor>>,
    graph: StepGraph,
    frontier: Vec<String>,
    explicit_entry: Option<String>,
    deferred_error: Option<GraphError>,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            description: None,
            tags: None,
            config: ExecutionConfig::default(),
            context: None,
            steps: HashMap::new(),
            graph: StepGraph::new(),
            frontier: Vec::new(),
            explicit_entry: None,
            deferred_error: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Set the workflow-level default execution config. Steps that were
    /// not configured explicitly inherit it (by value) at build time.
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an opaque user context, serialized once and carried on every
    /// run of this workflow.
    pub fn with_context<T: Serialize + ?Sized>(mut self, context: &T) -> Self {
        match serde_json::to_vec(context) {
            Ok(bytes) => self.context = Some(bytes),
            Err(e) => {
                self.defer(GraphError::Context {
                    message: e.to_string(),
                });
            }
        }
        self
    }

    /// Append a step after the current frontier and make it the frontier.
    pub fn then_step(mut self, step: impl StepExecutor + 'static) -> Self {
        self.append(Box::new(step), NodeKind::Sequential);
        self
    }

    /// Append steps that are mutually independent after the current
    /// frontier; together they become the new frontier. Independence is a
    /// declaration, not a concurrency mandate — the reference scheduler
    /// still runs them one at a time in topological order.
    pub fn parallel(mut self, steps: Vec<Box<dyn StepExecutor>>) -> Self {
        let mut new_frontier = Vec::with_capacity(steps.len());
        for step in steps {
            let step_id = step.id().to_string();
            self.register(step, NodeKind::Parallel);
            for last in self.frontier.clone() {
                if let Err(e) = self.graph.add_edge(&last, &step_id) {
                    self.defer(e);
                }
            }
            new_frontier.push(step_id);
        }
        self.frontier = new_frontier;
        self
    }

    /// Append steps chained one after another, equivalent to repeated
    /// [`then_step`](Self::then_step).
    pub fn sequence(mut self, steps: Vec<Box<dyn StepExecutor>>) -> Self {
        for step in steps {
            self.append(step, NodeKind::Sequential);
        }
        self
    }

    /// Append a conditionally-gated step: the handler runs only when
    /// `condition` is true at runtime; otherwise `default_value` (or the
    /// pass-through/zero-value fallback) becomes the recorded output.
    pub fn then_step_if<F, Fut>(
        self,
        step: impl StepExecutor + 'static,
        condition: F,
        default_value: Option<Value>,
    ) -> Self
    where
        F: Fn(crate::StepContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        let mut wrapped = ConditionalStep::new(step, condition);
        if let Some(value) = default_value {
            wrapped = wrapped.with_default(value);
        }
        self.then_step(wrapped)
    }

    /// Override the derived entry point.
    pub fn set_entry_point(mut self, step_id: impl Into<String>) -> Self {
        self.explicit_entry = Some(step_id.into());
        self
    }

    /// Validate and freeze the workflow.
    ///
    /// Checks, in order: deferred construction errors, non-empty step ids,
    /// graph invariants (acyclicity, entry point, reachability), and
    /// step/graph consistency. Then propagates the default config onto
    /// steps still carrying the sentinel default.
    pub fn build(mut self) -> Result<Workflow, GraphError> {
        if let Some(err) = self.deferred_error {
            return Err(err);
        }
        if let Some(entry) = &self.explicit_entry {
            self.graph.set_entry_point(entry)?;
        }
        self.graph.validate()?;

        for step_id in self.graph.node_ids() {
            if !self.steps.contains_key(step_id) {
                return Err(GraphError::MissingStep {
                    step_id: step_id.to_string(),
                });
            }
        }

        let default = ExecutionConfig::default();
        let mut steps: HashMap<String, Arc<dyn StepExecutor>> =
            HashMap::with_capacity(self.steps.len());
        for (id, mut step) in self.steps {
            if *step.config() == default {
                step.set_config(self.config.clone());
            }
            steps.insert(id, Arc::from(step));
        }

        Ok(Workflow::new(
            self.id,
            self.name,
            self.version,
            self.description,
            self.tags,
            steps,
            self.graph,
            self.config,
            self.context,
        ))
    }

    fn append(&mut self, step: Box<dyn StepExecutor>, kind: NodeKind) {
        let step_id = step.id().to_string();
        self.register(step, kind);
        for last in self.frontier.clone() {
            if let Err(e) = self.graph.add_edge(&last, &step_id) {
                self.defer(e);
            }
        }
        self.frontier = vec![step_id];
    }

    /// Register the step and its graph node unless that id is already
    /// present (re-chaining an existing step only adds edges).
    fn register(&mut self, step: Box<dyn StepExecutor>, kind: NodeKind) {
        let step_id = step.id().to_string();
        if step_id.is_empty() {
            self.defer(GraphError::EmptyStepId);
            return;
        }
        if self.steps.contains_key(&step_id) {
            return;
        }
        if let Err(e) = self.graph.add_node(step_id.clone(), kind) {
            self.defer(e);
            return;
        }
        self.steps.insert(step_id, step);
    }

    fn defer(&mut self, err: GraphError) {
        if self.deferred_error.is_none() {
            self.deferred_error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use crate::types::BackoffStrategy;

    fn echo(id: &str) -> Step<String, String> {
        Step::new(id, id.to_uppercase(), |_ctx, input: String| async move { Ok(input) })
    }

    #[test]
    fn linear_chain_builds() {
        let wf = WorkflowBuilder::new("pipeline", "Pipeline")
            .then_step(echo("a"))
            .then_step(echo("b"))
            .then_step(echo("c"))
            .build()
            .unwrap();
        assert_eq!(
            wf.graph().topological_order().unwrap(),
            vec!["a", "b", "c"]
        );
        assert_eq!(wf.graph().entry_point().unwrap(), "a");
        assert_eq!(wf.step_count(), 3);
    }

    #[test]
    fn parallel_fans_out_and_rejoins() {
        let wf = WorkflowBuilder::new("fan", "Fan")
            .then_step(echo("a"))
            .parallel(vec![echo("b").boxed(), echo("c").boxed()])
            .then_step(echo("d"))
            .build()
            .unwrap();
        let g = wf.graph();
        assert_eq!(g.node_kind("b"), Some(NodeKind::Parallel));
        assert_eq!(g.node_kind("c"), Some(NodeKind::Parallel));
        assert_eq!(g.predecessors("d"), vec!["b", "c"]);
        assert_eq!(g.topological_order().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn sequence_equals_repeated_then_step() {
        let wf = WorkflowBuilder::new("seq", "Seq")
            .sequence(vec![echo("a").boxed(), echo("b").boxed(), echo("c").boxed()])
            .build()
            .unwrap();
        assert_eq!(
            wf.graph().topological_order().unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn empty_step_id_rejected() {
        let result = WorkflowBuilder::new("bad", "Bad")
            .then_step(echo(""))
            .build();
        assert!(matches!(result, Err(GraphError::EmptyStepId)));
    }

    #[test]
    fn empty_workflow_fails() {
        assert!(matches!(
            WorkflowBuilder::new("empty", "Empty").build(),
            Err(GraphError::Empty)
        ));
    }

    #[test]
    fn duplicate_step_id_is_reused_not_duplicated() {
        // Chaining the same id twice creates a self-edge, which the cycle
        // check rejects at build time.
        let result = WorkflowBuilder::new("dup", "Dup")
            .then_step(echo("a"))
            .then_step(echo("a"))
            .build();
        assert!(matches!(result, Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn default_config_propagates_only_to_unconfigured_steps() {
        let custom_default = ExecutionConfig {
            max_retries: 9,
            ..ExecutionConfig::default()
        };
        let wf = WorkflowBuilder::new("cfg", "Cfg")
            .with_config(custom_default)
            .then_step(echo("inherits"))
            .then_step(echo("explicit").with_backoff(BackoffStrategy::None).with_retries(1))
            .build()
            .unwrap();

        assert_eq!(wf.step("inherits").unwrap().config().max_retries, 9);
        let explicit = wf.step("explicit").unwrap().config();
        assert_eq!(explicit.max_retries, 1);
        assert_eq!(explicit.retry_backoff, BackoffStrategy::None);
    }

    #[test]
    fn workflow_metadata_carries_through() {
        let mut tags = BTreeMap::new();
        tags.insert("team".to_string(), "growth".to_string());
        let wf = WorkflowBuilder::new("meta", "Meta")
            .with_version("2.1.0")
            .with_description("nightly enrichment")
            .with_tags(tags)
            .with_context(&serde_json::json!({"tenant": "acme"}))
            .then_step(echo("only"))
            .build()
            .unwrap();
        assert_eq!(wf.version(), "2.1.0");
        assert_eq!(wf.description(), Some("nightly enrichment"));
        assert_eq!(wf.tags().unwrap()["team"], "growth");
        assert!(wf.context().is_some());
    }

    #[test]
    fn explicit_entry_point_is_validated() {
        let result = WorkflowBuilder::new("entry", "Entry")
            .then_step(echo("a"))
            .set_entry_point("ghost")
            .build();
        assert!(matches!(result, Err(GraphError::UnknownStep { .. })));
    }

    #[test]
    fn equivalent_builders_produce_identical_orders() {
        let build = || {
            WorkflowBuilder::new("same", "Same")
                .then_step(echo("a"))
                .parallel(vec![echo("b").boxed(), echo("c").boxed()])
                .then_step(echo("d"))
                .build()
                .unwrap()
        };
        assert_eq!(
            build().graph().topological_order().unwrap(),
            build().graph().topological_order().unwrap()
        );
    }
}
