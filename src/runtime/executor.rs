/// Node executor contract and the type-keyed executor registry
///
/// An executor consumes a node definition and an input payload and produces
/// logs plus an optional output payload, branch mask and propagation delay.
/// Executors hold no per-run state and are called concurrently for
/// different tasks.

use crate::runtime::nodes::{
    ApiCallExecutor, DecisionExecutor, DelayExecutor, IfElseExecutor, InputTextExecutor,
    NotificationExecutor,
};
use crate::workflow::types::Node;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Category of a log line produced by an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionLogKind {
    Input,
    Decision,
    Notification,
    Api,
    Delay,
    Error,
}

/// One log line produced while executing a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub kind: ExecutionLogKind,
    pub node_id: String,
    pub name: String,
    pub content: String,
}

impl ExecutionLog {
    pub fn new(kind: ExecutionLogKind, node: &Node, content: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: node.id.clone(),
            name: node.display_name(),
            content: content.into(),
        }
    }
}

/// Result of executing a single node
#[derive(Debug, Clone, Default)]
pub struct NodeOutcome {
    pub logs: Vec<ExecutionLog>,
    /// Output forwarded to downstream nodes
    pub payload: Option<Value>,
    /// Branch mask; `None` keeps every outgoing edge live
    pub allowed_source_handles: Option<BTreeSet<String>>,
    /// Delay to apply before downstream tasks are enqueued
    pub delay_ms: Option<u64>,
}

impl NodeOutcome {
    /// Forward `payload` unchanged with a single log line
    pub fn passthrough(payload: &Value, log: ExecutionLog) -> Self {
        Self {
            logs: vec![log],
            payload: Some(payload.clone()),
            ..Default::default()
        }
    }
}

/// Executes one node type
///
/// An `Err` marks the task `failed` with the error's message. Soft failures
/// that downstream nodes should be able to branch on belong in the payload.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Node type tag this executor handles, e.g. `"apiCall"`
    fn node_type(&self) -> &'static str;

    async fn execute(&self, node: &Node, input: &Value) -> anyhow::Result<NodeOutcome>;
}

/// Type-keyed table of executors, read-only once the engine is running
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type
    pub fn with_builtins(client: reqwest::Client, default_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(InputTextExecutor));
        registry.register(Arc::new(ApiCallExecutor::new(client, default_timeout)));
        registry.register(Arc::new(DecisionExecutor));
        registry.register(Arc::new(IfElseExecutor));
        registry.register(Arc::new(DelayExecutor));
        registry.register(Arc::new(NotificationExecutor));
        registry
    }

    /// Register (or replace) the executor for its node type
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.node_type().to_string(), executor);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}
