/// Run, task and run-log persistence
///
/// The store is the only shared mutable state in the engine. Every status
/// change goes through a guarded operation that only applies when the row is
/// still in the expected prior status, and reports whether it applied. That
/// guard is what makes concurrent, redelivered and stale triggers harmless.

pub mod sqlite;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub use sqlite::SqliteTaskStore;

/// Lifecycle of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one node's execution within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a persisted run log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    System,
    NodeOutput,
    Info,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::NodeOutput => "node-output",
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "node-output" => Ok(Self::NodeOutput),
            "info" => Ok(Self::Info),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log kind '{}'", other)),
        }
    }
}

/// One execution instance of a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub input: Option<Value>,
    /// Summary set when the run becomes terminal
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(workflow_id: impl Into<String>, input: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: RunStatus::Queued,
            input,
            result: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// One node's execution record within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_type: String,
    pub status: TaskStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Node IDs whose edges target this node; frozen at run start
    pub dependencies: Vec<String>,
    /// Branch mask: `None` = every outgoing edge live, empty = no handled edge live
    pub allowed_source_handles: Option<BTreeSet<String>>,
    /// Propagation delay the executor asked to apply to downstream tasks
    pub delay_ms: Option<u64>,
    /// Identifier of the queue job carrying this task
    pub external_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh `pending` task for one node of a run
    pub fn pending(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: TaskStatus::Pending,
            input: None,
            output: None,
            error: None,
            dependencies,
            allowed_source_handles: None,
            delay_ms: None,
            external_job_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// What a successful execution writes back onto its task
#[derive(Debug, Clone, Default)]
pub struct TaskCompletion {
    pub output: Option<Value>,
    pub allowed_source_handles: Option<BTreeSet<String>>,
    pub delay_ms: Option<u64>,
}

/// Append-only run log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub id: String,
    pub run_id: String,
    /// `None` for run-level events
    pub node_id: Option<String>,
    pub kind: LogKind,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl RunLog {
    pub fn new(
        run_id: impl Into<String>,
        node_id: Option<String>,
        kind: LogKind,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            node_id,
            kind,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Task totals per status for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::Queued => self.queued += n,
            TaskStatus::Running => self.running += n,
            TaskStatus::Completed => self.completed += n,
            TaskStatus::Failed => self.failed += n,
            TaskStatus::Skipped => self.skipped += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.queued + self.running + self.completed + self.failed + self.skipped
    }

    /// Tasks that are queued or running and will produce further events
    pub fn in_flight(&self) -> u64 {
        self.queued + self.running
    }
}

/// Storage contract for runs, tasks and run logs
///
/// Operations returning `bool` are compare-and-swap transitions: `true` only
/// when the row was in the required prior status and has been updated.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_run(&self, run: &Run) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;

    async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<Run>>;

    /// queued -> running
    async fn mark_run_running(&self, run_id: &str) -> Result<bool>;

    /// running -> succeeded|failed, recording the summary
    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        result: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// queued|running -> failed, recording the summary
    async fn cancel_run(&self, run_id: &str, result: &Value, at: DateTime<Utc>) -> Result<bool>;

    /// Insert every task of a run atomically
    async fn create_tasks(&self, tasks: &[Task]) -> Result<()>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    async fn get_task_by_node(&self, run_id: &str, node_id: &str) -> Result<Option<Task>>;

    /// All tasks of a run in creation order
    async fn list_tasks(&self, run_id: &str) -> Result<Vec<Task>>;

    async fn list_tasks_by_status(&self, run_id: &str, status: TaskStatus) -> Result<Vec<Task>>;

    async fn count_tasks(&self, run_id: &str) -> Result<TaskCounts>;

    /// pending -> queued, setting the forwarded input
    async fn queue_task(&self, task_id: &str, input: &Value) -> Result<bool>;

    async fn set_task_job_id(&self, task_id: &str, job_id: &str) -> Result<()>;

    /// queued -> running
    async fn start_task(&self, task_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// running -> completed
    async fn complete_task(
        &self,
        task_id: &str,
        completion: &TaskCompletion,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// running -> failed
    async fn fail_task(&self, task_id: &str, error: &str, at: DateTime<Utc>) -> Result<bool>;

    /// pending -> skipped for the named nodes; returns how many changed
    async fn skip_pending_tasks(
        &self,
        run_id: &str,
        node_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// pending|queued -> skipped for the whole run; returns how many changed
    async fn skip_open_tasks(&self, run_id: &str, at: DateTime<Utc>) -> Result<u64>;

    async fn append_logs(&self, logs: &[RunLog]) -> Result<()>;

    /// Run logs ordered by timestamp, then insertion order
    async fn list_logs(&self, run_id: &str) -> Result<Vec<RunLog>>;
}
