/// Dependency/readiness scheduler
///
/// Consumes dependency-check jobs. When a node finishes it advances the
/// downstream tasks whose dependencies are now all `completed`, then decides
/// whether the run is over, pruning pending tasks that no live path can
/// reach any more. Every step is derived from the store and every write is
/// status-guarded, so redelivered and concurrent triggers are harmless.

use crate::error::{EngineError, Result};
use crate::runtime::queue::{DependencyJob, JobHandler, JobOptions, JobQueue, TaskJob};
use crate::store::{LogKind, RunLog, RunStatus, Task, TaskStatus, TaskStore};
use crate::workflow::{WorkflowGraph, WorkflowRegistry};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub struct DependencyScheduler {
    store: Arc<dyn TaskStore>,
    workflows: Arc<WorkflowRegistry>,
    task_queue: Arc<dyn JobQueue<TaskJob>>,
}

impl DependencyScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        workflows: Arc<WorkflowRegistry>,
        task_queue: Arc<dyn JobQueue<TaskJob>>,
    ) -> Self {
        Self {
            store,
            workflows,
            task_queue,
        }
    }

    /// Propagate from a finished node, then evaluate run completion.
    ///
    /// A `completed` node forwards its output along its live outgoing edges.
    /// A `failed` node forwards nothing but still gets completion evaluated.
    /// Any other status means the trigger is stale and nothing happens.
    pub async fn on_task_completed(&self, run_id: &str, completed_node_id: &str) -> Result<()> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))?;

        if run.status.is_terminal() {
            tracing::debug!("Run {} is already {}, ignoring trigger from {}", run_id, run.status, completed_node_id);
            return Ok(());
        }

        let task = self
            .store
            .get_task_by_node(run_id, completed_node_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", format!("{}/{}", run_id, completed_node_id)))?;

        match task.status {
            TaskStatus::Completed => {
                let workflow = self.workflows.require_workflow(&run.workflow_id)?;
                let payload = task.output.clone().unwrap_or_else(|| json!({}));
                let delay_ms = task.delay_ms.filter(|ms| *ms > 0);

                let live_edges = workflow
                    .graph
                    .outgoing(completed_node_id)
                    .iter()
                    .filter(|edge| edge.is_live(task.allowed_source_handles.as_ref()));

                for edge in live_edges {
                    self.try_advance(run_id, &edge.target_id, &payload, delay_ms).await?;
                }
            }
            TaskStatus::Failed => {
                tracing::debug!("Node {} failed in run {}, nothing to propagate", completed_node_id, run_id);
            }
            other => {
                let stale = EngineError::InvalidTransition {
                    kind: "task",
                    id: task.id.clone(),
                    expected: "completed or failed".to_string(),
                    actual: other.to_string(),
                };
                tracing::debug!("Ignoring stale trigger: {}", stale);
                return Ok(());
            }
        }

        self.evaluate_completion(run_id).await?;
        Ok(())
    }

    /// Queue `node_id` if it is still pending and every dependency is completed.
    ///
    /// Returns whether this call queued the task.
    pub async fn try_advance(
        &self,
        run_id: &str,
        node_id: &str,
        payload: &Value,
        delay_ms: Option<u64>,
    ) -> Result<bool> {
        let Some(task) = self.store.get_task_by_node(run_id, node_id).await? else {
            tracing::warn!("⚠️ No task for node {} in run {}", node_id, run_id);
            return Ok(false);
        };

        if task.status != TaskStatus::Pending {
            tracing::debug!("Task {} ({}) is {}, not advancing", task.id, node_id, task.status);
            return Ok(false);
        }

        if !self.dependencies_satisfied(run_id, &task.dependencies).await? {
            tracing::debug!("Dependencies not yet satisfied for {} in run {}", node_id, run_id);
            return Ok(false);
        }

        self.dispatch(&task, payload, delay_ms).await
    }

    /// pending -> queued for one task, then hand it to the task queue
    pub async fn dispatch(&self, task: &Task, input: &Value, delay_ms: Option<u64>) -> Result<bool> {
        if !self.store.queue_task(&task.id, input).await? {
            tracing::debug!("Task {} was advanced by a concurrent trigger", task.id);
            return Ok(false);
        }

        self.enqueue(task, input, delay_ms).await?;
        Ok(true)
    }

    /// Submit an already-queued task to the task queue
    pub async fn enqueue(&self, task: &Task, input: &Value, delay_ms: Option<u64>) -> Result<()> {
        let job = TaskJob {
            task_id: task.id.clone(),
            run_id: task.run_id.clone(),
            node_id: task.node_id.clone(),
            node_type: task.node_type.clone(),
            input: input.clone(),
        };
        let options = delay_ms
            .filter(|ms| *ms > 0)
            .map(|ms| JobOptions::delayed(Duration::from_millis(ms)))
            .unwrap_or_default();

        let job_id = self.task_queue.enqueue(job, options).await?;
        self.store.set_task_job_id(&task.id, &job_id).await?;

        match delay_ms.filter(|ms| *ms > 0) {
            Some(ms) => tracing::info!("⏳ Queued task {} ({}) with {}ms delay", task.id, task.node_id, ms),
            None => tracing::info!("📥 Queued task {} ({})", task.id, task.node_id),
        }
        Ok(())
    }

    async fn dependencies_satisfied(&self, run_id: &str, dependencies: &[String]) -> Result<bool> {
        if dependencies.is_empty() {
            return Ok(true);
        }

        let statuses: HashMap<String, TaskStatus> = self
            .store
            .list_tasks(run_id)
            .await?
            .into_iter()
            .map(|t| (t.node_id, t.status))
            .collect();

        Ok(dependencies
            .iter()
            .all(|dep| statuses.get(dep) == Some(&TaskStatus::Completed)))
    }

    /// Finalize the run if no task can change any more.
    ///
    /// Returns the terminal status when this call finalized the run.
    pub async fn evaluate_completion(&self, run_id: &str) -> Result<Option<RunStatus>> {
        let mut counts = self.store.count_tasks(run_id).await?;
        if counts.in_flight() > 0 {
            return Ok(None);
        }

        if counts.pending > 0 {
            if self.prune_unreachable(run_id).await? > 0 {
                counts = self.store.count_tasks(run_id).await?;
            }
            if counts.pending > 0 || counts.in_flight() > 0 {
                tracing::debug!("Run {} has {} reachable pending tasks", run_id, counts.pending);
                return Ok(None);
            }
        }

        let status = if counts.failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        let summary = json!({
            "completed": counts.completed,
            "failed": counts.failed,
            "skipped": counts.skipped,
            "total": counts.total(),
        });

        if !self.store.finalize_run(run_id, status, &summary, Utc::now()).await? {
            tracing::debug!("Run {} was already finalized", run_id);
            return Ok(None);
        }

        self.store
            .append_logs(&[RunLog::new(
                run_id,
                None,
                LogKind::System,
                format!("Workflow run {}", status),
                Some(summary),
            )])
            .await?;

        tracing::info!("🏁 Run {} finished: {}", run_id, status);
        Ok(Some(status))
    }

    /// Skip every pending task no live path can reach; returns how many were skipped
    pub async fn prune_unreachable(&self, run_id: &str) -> Result<u64> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))?;
        let workflow = self.workflows.require_workflow(&run.workflow_id)?;
        let tasks = self.store.list_tasks(run_id).await?;

        let unreachable = unreachable_pending(&workflow.graph, &tasks);
        if unreachable.is_empty() {
            return Ok(0);
        }

        let skipped = self
            .store
            .skip_pending_tasks(run_id, &unreachable, Utc::now())
            .await?;
        if skipped > 0 {
            tracing::info!("✂️ Skipped {} unreachable tasks in run {}: {:?}", skipped, run_id, unreachable);
        }
        Ok(skipped)
    }
}

#[async_trait]
impl JobHandler<DependencyJob> for DependencyScheduler {
    async fn handle(&self, job: &DependencyJob) -> Result<()> {
        self.on_task_completed(&job.run_id, &job.completed_node_id).await
    }
}

/// Pending node ids that no live edge path from an active node reaches.
///
/// Active nodes are those whose task is completed, running or queued. An
/// edge out of a node that recorded a branch mask is traversable only if the
/// mask allows it; every other edge is traversable. Failed and skipped nodes
/// will never emit, so paths do not continue through them.
pub fn unreachable_pending(graph: &WorkflowGraph, tasks: &[Task]) -> Vec<String> {
    let masks: HashMap<&str, &BTreeSet<String>> = tasks
        .iter()
        .filter_map(|t| t.allowed_source_handles.as_ref().map(|m| (t.node_id.as_str(), m)))
        .collect();

    let mut reachable: HashSet<&str> = tasks
        .iter()
        .filter(|t| {
            matches!(
                t.status,
                TaskStatus::Completed | TaskStatus::Running | TaskStatus::Queued
            )
        })
        .map(|t| t.node_id.as_str())
        .collect();

    let dead: HashSet<&str> = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Skipped))
        .map(|t| t.node_id.as_str())
        .collect();

    let mut frontier: Vec<&str> = reachable.iter().copied().collect();
    while let Some(node_id) = frontier.pop() {
        if dead.contains(node_id) {
            continue;
        }
        let mask = masks.get(node_id).copied();
        for edge in graph.outgoing(node_id) {
            if edge.is_live(mask) && reachable.insert(edge.target_id.as_str()) {
                frontier.push(edge.target_id.as_str());
            }
        }
    }

    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && !reachable.contains(t.node_id.as_str()))
        .map(|t| t.node_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Workflow;

    fn graph() -> WorkflowGraph {
        // in -> check -(out-true)-> yes -> join
        //             -(out-false)-> no -> after_no
        //      check -> audit (no handle)
        let wf: Workflow = serde_json::from_value(json!({
            "id": "wf",
            "nodes": [
                { "id": "in", "type": "inputText" },
                { "id": "check", "type": "ifElse" },
                { "id": "yes", "type": "notification" },
                { "id": "no", "type": "notification" },
                { "id": "after_no", "type": "notification" },
                { "id": "audit", "type": "notification" },
                { "id": "join", "type": "notification" }
            ],
            "edges": [
                { "sourceId": "in", "targetId": "check" },
                { "sourceId": "check", "targetId": "yes", "sourceHandleId": "out-true" },
                { "sourceId": "check", "targetId": "no", "sourceHandleId": "out-false" },
                { "sourceId": "check", "targetId": "audit" },
                { "sourceId": "no", "targetId": "after_no" },
                { "sourceId": "yes", "targetId": "join" }
            ]
        }))
        .unwrap();
        WorkflowGraph::build(&wf).unwrap()
    }

    fn task(node: &str, status: TaskStatus, mask: Option<&[&str]>) -> Task {
        let mut t = Task::pending("run", node, "notification", vec![]);
        t.status = status;
        t.allowed_source_handles = mask.map(|m| m.iter().map(|s| s.to_string()).collect());
        t
    }

    #[test]
    fn prunes_the_dead_branch_transitively() {
        let tasks = vec![
            task("in", TaskStatus::Completed, None),
            task("check", TaskStatus::Completed, Some(&["out-true"])),
            task("yes", TaskStatus::Queued, None),
            task("no", TaskStatus::Pending, None),
            task("after_no", TaskStatus::Pending, None),
            task("audit", TaskStatus::Pending, None),
            task("join", TaskStatus::Pending, None),
        ];

        let mut pruned = unreachable_pending(&graph(), &tasks);
        pruned.sort();
        assert_eq!(pruned, vec!["after_no", "no"]);
    }

    #[test]
    fn empty_mask_still_leaves_handle_less_edges_live() {
        let tasks = vec![
            task("in", TaskStatus::Completed, None),
            task("check", TaskStatus::Completed, Some(&[])),
            task("yes", TaskStatus::Pending, None),
            task("no", TaskStatus::Pending, None),
            task("after_no", TaskStatus::Pending, None),
            task("audit", TaskStatus::Pending, None),
            task("join", TaskStatus::Pending, None),
        ];

        let mut pruned = unreachable_pending(&graph(), &tasks);
        pruned.sort();
        assert_eq!(pruned, vec!["after_no", "join", "no", "yes"]);
    }

    #[test]
    fn undecided_branch_node_keeps_everything_reachable() {
        let tasks = vec![
            task("in", TaskStatus::Completed, None),
            task("check", TaskStatus::Running, None),
            task("yes", TaskStatus::Pending, None),
            task("no", TaskStatus::Pending, None),
            task("after_no", TaskStatus::Pending, None),
            task("audit", TaskStatus::Pending, None),
            task("join", TaskStatus::Pending, None),
        ];

        assert!(unreachable_pending(&graph(), &tasks).is_empty());
    }

    #[test]
    fn failed_nodes_do_not_seed_reachability() {
        let tasks = vec![
            task("in", TaskStatus::Completed, None),
            task("check", TaskStatus::Failed, None),
            task("yes", TaskStatus::Pending, None),
            task("no", TaskStatus::Skipped, None),
            task("after_no", TaskStatus::Pending, None),
            task("audit", TaskStatus::Pending, None),
            task("join", TaskStatus::Pending, None),
        ];

        let mut pruned = unreachable_pending(&graph(), &tasks);
        pruned.sort();
        assert_eq!(pruned, vec!["after_no", "audit", "join", "yes"]);
    }
}
