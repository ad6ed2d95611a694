/// Run control surface
///
/// Start, inspect, cancel and re-check durable runs, recover in-flight runs
/// after a restart, and execute a workflow synchronously.

use crate::error::{EngineError, Result};
use crate::runtime::coordinator::task_input;
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::executor::ExecutionLog;
use crate::runtime::scheduler::DependencyScheduler;
use crate::store::{
    LogKind, Run, RunLog, RunStatus, Task, TaskCounts, TaskStatus, TaskStore,
};
use crate::workflow::WorkflowRegistry;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Snapshot of a run with its tasks and logs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub run: Run,
    pub counts: TaskCounts,
    pub tasks: Vec<Task>,
    pub logs: Vec<RunLog>,
}

pub struct RunService {
    store: Arc<dyn TaskStore>,
    workflows: Arc<WorkflowRegistry>,
    scheduler: Arc<DependencyScheduler>,
    engine: ExecutionEngine,
}

impl RunService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        workflows: Arc<WorkflowRegistry>,
        scheduler: Arc<DependencyScheduler>,
        engine: ExecutionEngine,
    ) -> Self {
        Self {
            store,
            workflows,
            scheduler,
            engine,
        }
    }

    /// Create a run with one pending task per node and queue its start tasks
    pub async fn start_run(&self, workflow_id: &str, input: Value) -> Result<String> {
        let workflow = self.workflows.require_workflow(workflow_id)?;
        let graph = &workflow.graph;

        let run = Run::new(workflow_id, Some(input.clone()));
        self.store.create_run(&run).await?;
        self.store
            .append_logs(&[RunLog::new(
                &run.id,
                None,
                LogKind::System,
                "Async workflow run started",
                Some(json!({ "workflowId": workflow_id, "input": input })),
            )])
            .await?;

        let tasks: Vec<Task> = graph
            .nodes()
            .map(|node| {
                Task::pending(&run.id, &node.id, &node.node_type, graph.dependencies_of(&node.id))
            })
            .collect();
        self.store.create_tasks(&tasks).await?;
        self.store.mark_run_running(&run.id).await?;

        tracing::info!(
            "🚀 Started run {} of workflow '{}' with {} tasks",
            run.id,
            workflow_id,
            tasks.len()
        );

        for node_id in graph.start_node_ids() {
            if let Some(task) = tasks.iter().find(|t| t.node_id == node_id) {
                self.scheduler.dispatch(task, &input, None).await?;
            }
        }

        self.scheduler.evaluate_completion(&run.id).await?;
        Ok(run.id)
    }

    pub async fn get_run_status(&self, run_id: &str) -> Result<RunDetails> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))?;

        Ok(RunDetails {
            counts: self.store.count_tasks(run_id).await?,
            tasks: self.store.list_tasks(run_id).await?,
            logs: self.store.list_logs(run_id).await?,
            run,
        })
    }

    /// Fail the run now and skip every task that has not started
    ///
    /// Running tasks finish on their own; their completion is still recorded
    /// but propagates nowhere.
    pub async fn cancel_run(&self, run_id: &str) -> Result<()> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))?;

        let now = Utc::now();
        if run.status.is_terminal()
            || !self.store.cancel_run(run_id, &json!({ "cancelled": true }), now).await?
        {
            let actual = self
                .store
                .get_run(run_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(run.status);
            return Err(EngineError::InvalidTransition {
                kind: "run",
                id: run_id.to_string(),
                expected: "queued or running".to_string(),
                actual: actual.to_string(),
            });
        }

        let skipped = self.store.skip_open_tasks(run_id, now).await?;
        self.store
            .append_logs(&[RunLog::new(
                run_id,
                None,
                LogKind::System,
                "Workflow run cancelled",
                Some(json!({ "skippedTasks": skipped })),
            )])
            .await?;

        tracing::info!("🛑 Cancelled run {} ({} tasks skipped)", run_id, skipped);
        Ok(())
    }

    /// Re-evaluate completion from current state and return the run
    pub async fn recheck_run(&self, run_id: &str) -> Result<Run> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))?;

        if run.status == RunStatus::Running {
            self.scheduler.evaluate_completion(run_id).await?;
        }

        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))
    }

    /// Resume every running run from the store after a restart.
    ///
    /// Tasks left `running` by the previous process are failed, `queued`
    /// tasks are re-submitted, and propagation is replayed from every
    /// finished node. Returns how many runs were resumed.
    pub async fn recover(&self) -> Result<usize> {
        let runs = self.store.list_runs_by_status(RunStatus::Running).await?;
        let mut recovered = 0;

        for run in &runs {
            match self.recover_run(&run.id).await {
                Ok(()) => recovered += 1,
                Err(e) => tracing::error!("❌ Could not recover run {}: {}", run.id, e),
            }
        }

        if recovered > 0 {
            tracing::info!("♻️ Recovered {} in-flight runs", recovered);
        }
        Ok(recovered)
    }

    async fn recover_run(&self, run_id: &str) -> Result<()> {
        for task in self.store.list_tasks_by_status(run_id, TaskStatus::Running).await? {
            if self
                .store
                .fail_task(&task.id, "Task interrupted by engine restart", Utc::now())
                .await?
            {
                tracing::warn!("⚠️ Failed interrupted task {} in run {}", task.id, run_id);
            }
        }

        for task in self.store.list_tasks_by_status(run_id, TaskStatus::Queued).await? {
            self.scheduler.enqueue(&task, &task_input(&task), None).await?;
        }

        for task in self.store.list_tasks(run_id).await? {
            if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
                self.scheduler.on_task_completed(run_id, &task.node_id).await?;
            }
        }

        self.scheduler.evaluate_completion(run_id).await?;
        Ok(())
    }

    /// Run a workflow synchronously and return its logs
    pub async fn execute_sync(&self, workflow_id: &str, input: Value) -> Result<Vec<ExecutionLog>> {
        let workflow = self.workflows.require_workflow(workflow_id)?;
        Ok(self.engine.run(&workflow, input).await)
    }
}
