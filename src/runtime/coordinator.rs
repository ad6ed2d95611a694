/// Task execution coordinator
///
/// Consumes task-execution jobs: runs the node's executor, records logs and
/// the result on the task, then always submits a dependency-check job for the
/// node, whether the task completed or failed.

use crate::error::{EngineError, Result};
use crate::runtime::executor::{ExecutionLogKind, ExecutorRegistry, NodeOutcome};
use crate::runtime::queue::{DependencyJob, JobHandler, JobOptions, JobQueue, TaskJob};
use crate::store::{LogKind, Run, RunLog, Task, TaskCompletion, TaskStatus, TaskStore};
use crate::workflow::WorkflowRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct TaskCoordinator {
    store: Arc<dyn TaskStore>,
    workflows: Arc<WorkflowRegistry>,
    executors: Arc<ExecutorRegistry>,
    dependency_queue: Arc<dyn JobQueue<DependencyJob>>,
}

impl TaskCoordinator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        workflows: Arc<WorkflowRegistry>,
        executors: Arc<ExecutorRegistry>,
        dependency_queue: Arc<dyn JobQueue<DependencyJob>>,
    ) -> Self {
        Self {
            store,
            workflows,
            executors,
            dependency_queue,
        }
    }

    /// Execute one queued task and trigger propagation from its node
    pub async fn execute_task(&self, task_id: &str) -> Result<()> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))?;

        if task.status != TaskStatus::Queued {
            tracing::debug!("Task {} is {}, not queued; dropping duplicate delivery", task_id, task.status);
            return Ok(());
        }

        let run = self
            .store
            .get_run(&task.run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", &task.run_id))?;

        if !self.store.start_task(task_id, Utc::now()).await? {
            tracing::debug!("Task {} was started or skipped concurrently", task_id);
            return Ok(());
        }

        tracing::info!("▶️ Executing task {} (node: {}, type: {})", task.id, task.node_id, task.node_type);
        let started = std::time::Instant::now();

        match self.run_executor(&run, &task).await {
            Ok(outcome) => self.record_success(&task, outcome).await?,
            Err(e) => self.record_failure(&task, e).await?,
        }

        tracing::debug!("Task {} finished in {:?}", task.id, started.elapsed());

        self.dependency_queue
            .enqueue(
                DependencyJob {
                    run_id: task.run_id.clone(),
                    completed_node_id: task.node_id.clone(),
                },
                JobOptions::default(),
            )
            .await?;

        Ok(())
    }

    async fn run_executor(&self, run: &Run, task: &Task) -> Result<NodeOutcome> {
        let workflow = self.workflows.require_workflow(&run.workflow_id)?;
        let node = workflow
            .graph
            .node(&task.node_id)
            .ok_or_else(|| EngineError::not_found("node", &task.node_id))?;
        let executor = self
            .executors
            .get(&task.node_type)
            .ok_or_else(|| EngineError::ExecutorMissing(task.node_type.clone()))?;

        let input = task_input(task);
        executor
            .execute(node, &input)
            .await
            .map_err(|e| EngineError::Executor(format!("{:#}", e)))
    }

    async fn record_success(&self, task: &Task, outcome: NodeOutcome) -> Result<()> {
        let logs: Vec<RunLog> = outcome
            .logs
            .iter()
            .map(|log| {
                RunLog::new(
                    &task.run_id,
                    Some(task.node_id.clone()),
                    LogKind::NodeOutput,
                    log.content.clone(),
                    Some(json!({ "name": log.name, "kind": log.kind })),
                )
            })
            .collect();
        if !logs.is_empty() {
            self.store.append_logs(&logs).await?;
        }

        let completion = TaskCompletion {
            output: outcome.payload,
            allowed_source_handles: outcome.allowed_source_handles,
            delay_ms: outcome.delay_ms,
        };

        if self.store.complete_task(&task.id, &completion, Utc::now()).await? {
            tracing::info!("✅ Task {} ({}) completed", task.id, task.node_id);
        } else {
            tracing::debug!("Completion of task {} not applied; it is no longer running", task.id);
        }
        Ok(())
    }

    async fn record_failure(&self, task: &Task, error: EngineError) -> Result<()> {
        let message = match error {
            EngineError::Executor(message) => message,
            other => other.to_string(),
        };

        tracing::error!("❌ Task {} ({}) failed: {}", task.id, task.node_id, message);

        self.store
            .append_logs(&[RunLog::new(
                &task.run_id,
                Some(task.node_id.clone()),
                LogKind::Error,
                message.clone(),
                Some(json!({ "name": task.node_id, "kind": ExecutionLogKind::Error })),
            )])
            .await?;

        if !self.store.fail_task(&task.id, &message, Utc::now()).await? {
            tracing::debug!("Failure of task {} not applied; it is no longer running", task.id);
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler<TaskJob> for TaskCoordinator {
    async fn handle(&self, job: &TaskJob) -> Result<()> {
        self.execute_task(&job.task_id).await
    }
}

/// Forwarded input for a task, defaulting to an empty object
pub fn task_input(task: &Task) -> Value {
    task.input.clone().unwrap_or_else(|| json!({}))
}
