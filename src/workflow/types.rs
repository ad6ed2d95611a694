/// Core workflow type definitions
///
/// Defines the graph a run executes: typed nodes with opaque JSON config and
/// edges that may be pinned to a named output handle of their source node.
/// These types are read-only while a run is in flight.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// A complete workflow definition containing nodes and their connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-weather-alert")
    pub id: String,
    /// Human-readable workflow name
    #[serde(default)]
    pub name: String,
    /// List of nodes in this workflow
    pub nodes: Vec<Node>,
    /// List of edges connecting nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A single node in the workflow DAG
///
/// The type tag selects the executor; the config blob is validated lazily by
/// that executor, never against a schema shared by all node types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "input-location")
    pub id: String,
    /// Executor type tag: "inputText", "apiCall", "decision", "ifElse", "delay", "notification"
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display name used in run logs
    #[serde(default)]
    pub name: Option<String>,
    /// Node-specific configuration parameters as flexible JSON
    #[serde(default)]
    pub config: Value,
    /// Declared outgoing connections (informational; edges are authoritative)
    #[serde(default)]
    pub connections: Vec<String>,
}

impl Node {
    /// Name shown in logs, falling back to "<type>-<id>"
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}-{}", self.node_type, self.id),
        }
    }
}

/// Connection between two nodes in the workflow DAG
///
/// An edge with a `source_handle_id` only carries data when the source node's
/// branch mask allows that handle. An edge without one is always live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node ID
    pub source_id: String,
    /// Target node ID
    pub target_id: String,
    /// Output handle on the source node (e.g., "out-true")
    #[serde(default)]
    pub source_handle_id: Option<String>,
    /// Input handle on the target node (not used for routing)
    #[serde(default)]
    pub target_handle_id: Option<String>,
}

impl Edge {
    /// Whether this edge may be traversed given its source node's branch mask.
    ///
    /// `None` means every outgoing edge is live. Otherwise handle-less edges
    /// stay live and handled edges are live only when their handle is allowed.
    pub fn is_live(&self, allowed: Option<&BTreeSet<String>>) -> bool {
        match (allowed, &self.source_handle_id) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(handles), Some(handle)) => handles.contains(handle),
        }
    }
}

/// Config keys that older graph editors persisted as JSON-encoded strings
const LEGACY_ENCODED_KEYS: &[&str] = &[
    "decisions",
    "condition",
    "headers",
    "queryParams",
    "expectedStatusCodes",
];

impl Workflow {
    /// Decode legacy string-encoded JSON in node configs.
    ///
    /// Applied at the storage/API boundary so executors only ever see native
    /// JSON. A config that is itself a string is parsed; listed keys holding a
    /// string that parses to an object or array are replaced by the parsed value.
    pub fn normalize_legacy_encoding(&mut self) {
        for node in &mut self.nodes {
            if let Value::String(raw) = &node.config {
                node.config = serde_json::from_str(raw).unwrap_or(Value::Null);
            }
            if node.config.is_null() {
                node.config = Value::Object(Default::default());
            }
            if let Value::Object(map) = &mut node.config {
                for key in LEGACY_ENCODED_KEYS {
                    if let Some(Value::String(raw)) = map.get(*key) {
                        if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                            if parsed.is_object() || parsed.is_array() {
                                map.insert((*key).to_string(), parsed);
                            }
                        }
                    }
                }
            }
        }
    }
}
