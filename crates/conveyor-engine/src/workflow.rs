//! The immutable workflow definition: named, versioned steps plus their
//! precedence graph and default execution policy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::graph::StepGraph;
use crate::step::StepExecutor;
use crate::types::ExecutionConfig;

/// A validated, buildable-once bundle of steps and their DAG.
///
/// Produced by [`WorkflowBuilder::build`](crate::WorkflowBuilder::build);
/// immutable afterwards. The graph and step map are guaranteed consistent:
/// every graph node has a registered step and vice versa.
pub struct Workflow {
    id: String,
    name: String,
    version: String,
    description: Option<String>,
    tags: Option<BTreeMap<String, String>>,
    steps: HashMap<String, Arc<dyn StepExecutor>>,
    graph: StepGraph,
    config: ExecutionConfig,
    context: Option<Vec<u8>>,
}

impl Workflow {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        name: String,
        version: String,
        description: Option<String>,
        tags: Option<BTreeMap<String, String>>,
        steps: HashMap<String, Arc<dyn StepExecutor>>,
        graph: StepGraph,
        config: ExecutionConfig,
        context: Option<Vec<u8>>,
    ) -> Self {
        Self {
            id,
            name,
            version,
            description,
            tags,
            steps,
            graph,
            config,
            context,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> Option<&BTreeMap<String, String>> {
        self.tags.as_ref()
    }

    /// The workflow-level default execution config.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    pub fn step(&self, step_id: &str) -> Option<&Arc<dyn StepExecutor>> {
        self.steps.get(step_id)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// The serialized user context, if one was set at build time.
    pub fn context(&self) -> Option<&[u8]> {
        self.context.as_deref()
    }
}
