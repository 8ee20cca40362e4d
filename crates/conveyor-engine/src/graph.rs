//! DAG structure for step precedence.
//!
//! Nodes are keyed by step id and carry a kind (sequential or parallel —
//! the latter declares independence, not a concurrency mandate). Edges mean
//! "must precede". Validation runs at build time; the topological order is
//! deterministic with insertion order as the tie-break so the run output
//! ("last step's output") is stable across runs.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::errors::GraphError;

/// How a node was declared by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Sequential,
    Parallel,
}

/// Directed acyclic graph of step ids.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    nodes: HashMap<String, NodeKind>,
    /// Node ids in insertion order; the topological tie-break.
    insertion: Vec<String>,
    edges: Vec<(String, String)>,
    entry_point: Option<String>,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>, kind: NodeKind) -> Result<(), GraphError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateStep { step_id: id });
        }
        self.insertion.push(id.clone());
        self.nodes.insert(id, kind);
        Ok(())
    }

    /// Add a "must precede" edge. Both endpoints must be registered.
    /// Re-adding an existing edge is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        for id in [from, to] {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::UnknownStep {
                    step_id: id.to_string(),
                });
            }
        }
        if !self.edges.iter().any(|(f, t)| f == from && t == to) {
            self.edges.push((from.to_string(), to.to_string()));
        }
        Ok(())
    }

    pub fn update_node_kind(&mut self, id: &str, kind: NodeKind) -> Result<(), GraphError> {
        match self.nodes.get_mut(id) {
            Some(k) => {
                *k = kind;
                Ok(())
            }
            None => Err(GraphError::UnknownStep {
                step_id: id.to_string(),
            }),
        }
    }

    /// Explicitly override the derived entry point.
    pub fn set_entry_point(&mut self, id: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(id) {
            return Err(GraphError::UnknownStep {
                step_id: id.to_string(),
            });
        }
        self.entry_point = Some(id.to_string());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_kind(&self, id: &str) -> Option<NodeKind> {
        self.nodes.get(id).copied()
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.insertion.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct predecessors of a node, in edge insertion order.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, to)| to == id)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// The designated entry point: the explicit override if set, otherwise
    /// the unique node with in-degree zero.
    pub fn entry_point(&self) -> Result<&str, GraphError> {
        if let Some(entry) = &self.entry_point {
            return Ok(entry);
        }
        let in_degrees = self.in_degrees();
        let candidates: Vec<&String> = self
            .insertion
            .iter()
            .filter(|id| in_degrees.get(id.as_str()) == Some(&0))
            .collect();
        match candidates.as_slice() {
            [] => Err(GraphError::NoEntryPoint),
            [single] => Ok(single.as_str()),
            many => Err(GraphError::AmbiguousEntryPoint {
                candidates: many.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    /// Validate the structural invariants: non-empty, acyclic, a single
    /// entry point, and every node reachable from it.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }
        self.topological_order()?;
        let entry = self.entry_point()?;

        // Reachability from the entry point.
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in &self.edges {
            outgoing.entry(from.as_str()).or_default().push(to.as_str());
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([entry]);
        visited.insert(entry);
        while let Some(id) = queue.pop_front() {
            for next in outgoing.get(id).into_iter().flatten() {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        for id in &self.insertion {
            if !visited.contains(id.as_str()) {
                return Err(GraphError::Unreachable {
                    step_id: id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Deterministic linearization: Kahn's algorithm, always emitting the
    /// earliest-inserted ready node first.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degrees = self.in_degrees();
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(self.insertion.len());

        while order.len() < self.insertion.len() {
            let next = self.insertion.iter().find(|id| {
                !emitted.contains(id.as_str()) && in_degrees.get(id.as_str()) == Some(&0)
            });
            let Some(id) = next else {
                let stuck = self
                    .insertion
                    .iter()
                    .find(|id| !emitted.contains(id.as_str()))
                    .expect("incomplete order implies a remaining node");
                return Err(GraphError::Cycle {
                    step_id: stuck.clone(),
                });
            };
            emitted.insert(id.as_str());
            order.push(id.clone());
            for (from, to) in &self.edges {
                if from == id {
                    if let Some(d) = in_degrees.get_mut(to.as_str()) {
                        *d -= 1;
                    }
                }
            }
        }
        Ok(order)
    }

    fn in_degrees(&self) -> HashMap<&str, usize> {
        let mut degrees: HashMap<&str, usize> =
            self.insertion.iter().map(|id| (id.as_str(), 0)).collect();
        for (_, to) in &self.edges {
            if let Some(d) = degrees.get_mut(to.as_str()) {
                *d += 1;
            }
        }
        degrees
    }
}
