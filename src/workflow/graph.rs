/// Petgraph-backed compiled view of a workflow
///
/// Validates the graph once (known endpoints, no cycles) and precomputes the
/// lookups the scheduler and runners hit on every event: outgoing edges in
/// declaration order and the frozen per-node dependency lists.

use crate::error::{EngineError, Result};
use crate::workflow::types::{Edge, Node, Workflow};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Node type tag of the designated start node
pub const INPUT_NODE_TYPE: &str = "inputText";

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Structural DAG, one petgraph node per workflow node
    dag: DiGraph<String, ()>,
    /// Mapping from node ID to graph node index
    index: HashMap<String, NodeIndex>,
    /// Node definitions by ID
    nodes: HashMap<String, Node>,
    /// Node IDs in declaration order
    order: Vec<String>,
    /// Outgoing edges per source node, in declaration order
    outgoing: HashMap<String, Vec<Edge>>,
    /// targetId -> distinct sourceIds
    dependencies: HashMap<String, Vec<String>>,
}

impl WorkflowGraph {
    /// Build and validate the graph for a workflow definition
    pub fn build(workflow: &Workflow) -> Result<Self> {
        tracing::debug!("🏗️ Building workflow graph for '{}'", workflow.id);

        let mut dag = DiGraph::new();
        let mut index = HashMap::new();
        let mut nodes = HashMap::new();
        let mut order = Vec::with_capacity(workflow.nodes.len());

        for node in &workflow.nodes {
            if index.contains_key(&node.id) {
                return Err(EngineError::InvalidWorkflow(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            let idx = dag.add_node(node.id.clone());
            index.insert(node.id.clone(), idx);
            nodes.insert(node.id.clone(), node.clone());
            order.push(node.id.clone());
        }

        let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();

        for edge in &workflow.edges {
            let from = index.get(&edge.source_id).ok_or_else(|| {
                EngineError::InvalidWorkflow(format!("edge references unknown node: {}", edge.source_id))
            })?;
            let to = index.get(&edge.target_id).ok_or_else(|| {
                EngineError::InvalidWorkflow(format!("edge references unknown node: {}", edge.target_id))
            })?;
            dag.add_edge(*from, *to, ());

            outgoing.entry(edge.source_id.clone()).or_default().push(edge.clone());
            let deps = dependencies.entry(edge.target_id.clone()).or_default();
            if !deps.contains(&edge.source_id) {
                deps.push(edge.source_id.clone());
            }
        }

        if toposort(&dag, None).is_err() {
            tracing::error!("❌ Workflow '{}' contains cycles - must be a DAG", workflow.id);
            return Err(EngineError::InvalidWorkflow(format!(
                "workflow '{}' contains cycles",
                workflow.id
            )));
        }

        Ok(Self {
            dag,
            index,
            nodes,
            order,
            outgoing,
            dependencies,
        })
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// All nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn outgoing(&self, node_id: &str) -> &[Edge] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Node IDs whose edges target `node_id`
    pub fn dependencies_of(&self, node_id: &str) -> Vec<String> {
        self.dependencies.get(node_id).cloned().unwrap_or_default()
    }

    /// Nodes without incoming edges, in declaration order
    pub fn root_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.index
                    .get(*id)
                    .map(|idx| {
                        self.dag
                            .neighbors_directed(*idx, Direction::Incoming)
                            .next()
                            .is_none()
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// First `inputText` node in declaration order
    pub fn input_node(&self) -> Option<&Node> {
        self.nodes().find(|node| node.node_type == INPUT_NODE_TYPE)
    }

    /// Nodes a new async run starts from: the input node, else every root
    pub fn start_node_ids(&self) -> Vec<String> {
        match self.input_node() {
            Some(node) => vec![node.id.clone()],
            None => self.root_ids(),
        }
    }
}
