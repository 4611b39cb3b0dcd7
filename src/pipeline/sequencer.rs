//! Deterministic ordering of operator graphs.
//!
//! Uses Kahn's algorithm. Nodes that become ready at the same time are
//! queued in insertion order, so identical inputs always produce the same
//! order and therefore the same generated script.

use std::collections::VecDeque;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SequencingError;

/// One operator instance in a pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineNode {
    /// Stable node id.
    pub id: String,
    /// Operator name, looked up in the operator registry.
    pub name: String,
    /// Constructor parameters.
    #[serde(default)]
    pub init_params: IndexMap<String, Value>,
    /// Invocation parameters.
    #[serde(default)]
    pub run_params: IndexMap<String, Value>,
    /// Ids of nodes that must run first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl PipelineNode {
    /// Creates a node with no parameters.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            init_params: IndexMap::new(),
            run_params: IndexMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Sets an init parameter.
    pub fn with_init_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.init_params.insert(key.into(), value);
        self
    }

    /// Sets a run parameter.
    pub fn with_run_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.run_params.insert(key.into(), value);
        self
    }

    /// Declares a dependency.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Directed edge: `source` runs before `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEdge {
    /// Upstream node id.
    pub source: String,
    /// Downstream node id.
    pub target: String,
}

impl PipelineEdge {
    /// Creates an edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A node/edge graph as read from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineGraph {
    /// Nodes in insertion order.
    pub nodes: Vec<PipelineNode>,
    /// Edges, in addition to each node's `depends_on`.
    #[serde(default)]
    pub edges: Vec<PipelineEdge>,
}

impl PipelineGraph {
    /// Reads a YAML or JSON graph file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let graph = if is_json {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };
        Ok(graph)
    }
}

/// Orders pipeline graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphSequencer;

impl DependencyGraphSequencer {
    /// Creates a sequencer.
    pub fn new() -> Self {
        Self
    }

    /// Returns the nodes in execution order.
    ///
    /// Edges are the union of `edges` and every node's `depends_on`.
    ///
    /// # Errors
    ///
    /// Fails without a partial order on duplicate ids, edges naming unknown
    /// nodes, or cycles.
    pub fn sequence(
        &self,
        nodes: &[PipelineNode],
        edges: &[PipelineEdge],
    ) -> Result<Vec<PipelineNode>, SequencingError> {
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

        let mut all_edges: Vec<(&str, &str)> = edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        for node in nodes {
            for dep in &node.depends_on {
                all_edges.push((dep.as_str(), node.id.as_str()));
            }
        }

        let order = topological_order(&ids, &all_edges)?;
        debug!(nodes = nodes.len(), edges = all_edges.len(), "Sequenced pipeline graph");
        Ok(order.into_iter().map(|i| nodes[i].clone()).collect())
    }

    /// Convenience wrapper over [`sequence`](Self::sequence) for a graph.
    pub fn sequence_graph(&self, graph: &PipelineGraph) -> Result<Vec<PipelineNode>, SequencingError> {
        self.sequence(&graph.nodes, &graph.edges)
    }
}

/// Kahn's algorithm over string ids. Returns indices into `ids`.
///
/// Duplicate edges are counted once. Isolated nodes have in-degree zero.
pub fn topological_order(ids: &[&str], edges: &[(&str, &str)]) -> Result<Vec<usize>, SequencingError> {
    let mut index: IndexMap<&str, usize> = IndexMap::with_capacity(ids.len());
    for (i, id) in ids.iter().copied().enumerate() {
        if index.insert(id, i).is_some() {
            return Err(SequencingError::DuplicateNode(id.to_string()));
        }
    }

    let mut in_degree = vec![0usize; ids.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];

    for &(source, target) in edges {
        let missing = |name: &str| SequencingError::DanglingEdge {
            source_id: source.to_string(),
            target_id: target.to_string(),
            missing: name.to_string(),
        };
        let from = *index.get(source).ok_or_else(|| missing(source))?;
        let to = *index.get(target).ok_or_else(|| missing(target))?;

        if !adjacency[from].contains(&to) {
            adjacency[from].push(to);
            in_degree[to] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(current) = queue.pop_front() {
        order.push(current);

        let mut next_ready: Vec<usize> = Vec::new();
        for &neighbor in &adjacency[current] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                next_ready.push(neighbor);
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != ids.len() {
        let members = (0..ids.len())
            .filter(|i| !order.contains(i))
            .map(|i| ids[i].to_string())
            .collect();
        return Err(SequencingError::Cycle { members });
    }

    Ok(order)
}
