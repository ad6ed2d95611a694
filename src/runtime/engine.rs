/// Synchronous, single-pass workflow runner
///
/// Walks the graph depth-first from the `inputText` node using the same
/// executors as the durable path, but with no persistence, no retries and
/// no realized delays. Sibling order follows edge declaration order, so a
/// given graph and input always produce the same log sequence.

use crate::runtime::executor::{ExecutionLog, ExecutionLogKind, ExecutorRegistry};
use crate::workflow::registry::CompiledWorkflow;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    executors: Arc<ExecutorRegistry>,
}

impl ExecutionEngine {
    pub fn new(executors: Arc<ExecutorRegistry>) -> Self {
        Self { executors }
    }

    /// Execute `workflow` once with `input` and return every log in order
    pub async fn run(&self, workflow: &CompiledWorkflow, input: Value) -> Vec<ExecutionLog> {
        let graph = &workflow.graph;
        let Some(start) = graph.input_node() else {
            tracing::warn!("⚠️ Workflow '{}' has no inputText node; nothing to run", workflow.workflow.id);
            return Vec::new();
        };

        tracing::info!("🚀 Starting synchronous run of '{}' from '{}'", workflow.workflow.id, start.id);
        let started = std::time::Instant::now();

        let mut logs = Vec::new();
        let mut payload = input;
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![start.id.clone()];

        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id.clone()) {
                continue;
            }
            let Some(node) = graph.node(&node_id) else {
                continue;
            };
            let Some(executor) = self.executors.get(&node.node_type) else {
                tracing::warn!("⚠️ No executor for type '{}', skipping node '{}'", node.node_type, node.id);
                continue;
            };

            match executor.execute(node, &payload).await {
                Ok(outcome) => {
                    logs.extend(outcome.logs);
                    if let Some(next) = outcome.payload.filter(|p| !p.is_null()) {
                        payload = next;
                    }
                    for edge in graph.outgoing(&node_id) {
                        if edge.is_live(outcome.allowed_source_handles.as_ref()) {
                            stack.push(edge.target_id.clone());
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("❌ Node '{}' failed: {:#}", node.id, e);
                    logs.push(ExecutionLog::new(ExecutionLogKind::Error, node, format!("{:#}", e)));
                }
            }
        }

        tracing::info!(
            "🎉 Synchronous run of '{}' finished in {:?} with {} logs",
            workflow.workflow.id,
            started.elapsed(),
            logs.len()
        );
        logs
    }
}
