/// SQLite-backed task store
///
/// Every guarded transition is a single conditional `UPDATE ... WHERE status = ?`,
/// so the status check and the write are one atomic statement and
/// `rows_affected` tells the caller whether it won the race.

use crate::error::{EngineError, Result};
use crate::store::{
    LogKind, Run, RunLog, RunStatus, Task, TaskCompletion, TaskCounts, TaskStatus, TaskStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const TASK_COLUMNS: &str = "id, run_id, node_id, node_type, status, input, output, error, \
     dependencies, allowed_source_handles, delay_ms, job_id, created_at, started_at, completed_at";

const RUN_COLUMNS: &str = "id, workflow_id, status, input, result, started_at, finished_at";

/// Open (and create if missing) the SQLite database behind `url`
pub async fn connect(url: &str) -> Result<SqlitePool> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    tracing::info!("🗄️ Opening run database: {}", url);
    Ok(SqlitePool::connect_with(options).await?)
}

/// Single-connection in-memory database, kept alive for the pool's lifetime
pub async fn memory_pool() -> Result<SqlitePool> {
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?)
}

#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create run, task and run-log tables. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT,
                result TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_tasks (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT,
                output TEXT,
                error TEXT,
                dependencies TEXT NOT NULL DEFAULT '[]',
                allowed_source_handles TEXT,
                delay_ms INTEGER,
                job_id TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                UNIQUE (run_id, node_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_run_logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                run_id TEXT NOT NULL,
                node_id TEXT,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON workflow_runs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_run_status ON workflow_tasks(run_id, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_run ON workflow_run_logs(run_id, timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (id, workflow_id, status, input, result, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.workflow_id)
        .bind(run.status.as_str())
        .bind(encode_json(run.input.as_ref())?)
        .bind(encode_json(run.result.as_ref())?)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query(&format!("SELECT {} FROM workflow_runs WHERE id = ?", RUN_COLUMNS))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<Run>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflow_runs WHERE status = ? ORDER BY started_at ASC",
            RUN_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(run_from_row).collect()
    }

    async fn mark_run_running(&self, run_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE workflow_runs SET status = 'running' WHERE id = ? AND status = 'queued'")
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        result: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE workflow_runs SET status = ?, result = ?, finished_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(serde_json::to_string(result)?)
        .bind(at)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn cancel_run(&self, run_id: &str, result: &Value, at: DateTime<Utc>) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE workflow_runs SET status = 'failed', result = ?, finished_at = ?
            WHERE id = ? AND status IN ('queued', 'running')
            "#,
        )
        .bind(serde_json::to_string(result)?)
        .bind(at)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn create_tasks(&self, tasks: &[Task]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for task in tasks {
            sqlx::query(&format!(
                "INSERT INTO workflow_tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TASK_COLUMNS
            ))
            .bind(&task.id)
            .bind(&task.run_id)
            .bind(&task.node_id)
            .bind(&task.node_type)
            .bind(task.status.as_str())
            .bind(encode_json(task.input.as_ref())?)
            .bind(encode_json(task.output.as_ref())?)
            .bind(&task.error)
            .bind(serde_json::to_string(&task.dependencies)?)
            .bind(
                task.allowed_source_handles
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(task.delay_ms.map(|d| d as i64))
            .bind(&task.external_job_id)
            .bind(task.created_at)
            .bind(task.started_at)
            .bind(task.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM workflow_tasks WHERE id = ?", TASK_COLUMNS))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn get_task_by_node(&self, run_id: &str, node_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workflow_tasks WHERE run_id = ? AND node_id = ?",
            TASK_COLUMNS
        ))
        .bind(run_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, run_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflow_tasks WHERE run_id = ? ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn list_tasks_by_status(&self, run_id: &str, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflow_tasks WHERE run_id = ? AND status = ? ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS
        ))
        .bind(run_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn count_tasks(&self, run_id: &str) -> Result<TaskCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM workflow_tasks WHERE run_id = ? GROUP BY status",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = TaskCounts::default();
        for row in &rows {
            let status: TaskStatus = parse_column(row, "status")?;
            let n: i64 = row.try_get("n")?;
            counts.add(status, n.max(0) as u64);
        }

        Ok(counts)
    }

    async fn queue_task(&self, task_id: &str, input: &Value) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workflow_tasks SET status = 'queued', input = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(serde_json::to_string(input)?)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_task_job_id(&self, task_id: &str, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE workflow_tasks SET job_id = ? WHERE id = ?")
            .bind(job_id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn start_task(&self, task_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workflow_tasks SET status = 'running', started_at = ? WHERE id = ? AND status = 'queued'",
        )
        .bind(at)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_task(
        &self,
        task_id: &str,
        completion: &TaskCompletion,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_tasks
            SET status = 'completed', output = ?, allowed_source_handles = ?, delay_ms = ?, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(encode_json(completion.output.as_ref())?)
        .bind(
            completion
                .allowed_source_handles
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(completion.delay_ms.map(|d| d as i64))
        .bind(at)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_task(&self, task_id: &str, error: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_tasks SET status = 'failed', error = ?, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(error)
        .bind(at)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn skip_pending_tasks(
        &self,
        run_id: &str,
        node_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut skipped = 0;

        for node_id in node_ids {
            let result = sqlx::query(
                r#"
                UPDATE workflow_tasks SET status = 'skipped', completed_at = ?
                WHERE run_id = ? AND node_id = ? AND status = 'pending'
                "#,
            )
            .bind(at)
            .bind(run_id)
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
            skipped += result.rows_affected();
        }

        tx.commit().await?;
        Ok(skipped)
    }

    async fn skip_open_tasks(&self, run_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_tasks SET status = 'skipped', completed_at = ?
            WHERE run_id = ? AND status IN ('pending', 'queued')
            "#,
        )
        .bind(at)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn append_logs(&self, logs: &[RunLog]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for log in logs {
            sqlx::query(
                r#"
                INSERT INTO workflow_run_logs (id, run_id, node_id, kind, message, data, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&log.id)
            .bind(&log.run_id)
            .bind(&log.node_id)
            .bind(log.kind.as_str())
            .bind(&log.message)
            .bind(encode_json(log.data.as_ref())?)
            .bind(log.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_logs(&self, run_id: &str) -> Result<Vec<RunLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, node_id, kind, message, data, timestamp
            FROM workflow_run_logs
            WHERE run_id = ?
            ORDER BY timestamp ASC, seq ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RunLog {
                    id: row.try_get("id")?,
                    run_id: row.try_get("run_id")?,
                    node_id: row.try_get("node_id")?,
                    kind: parse_column::<LogKind>(row, "kind")?,
                    message: row.try_get("message")?,
                    data: decode_json(row.try_get("data")?)?,
                    timestamp: row.try_get("timestamp")?,
                })
            })
            .collect()
    }
}

fn run_from_row(row: &SqliteRow) -> Result<Run> {
    Ok(Run {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: parse_column(row, "status")?,
        input: decode_json(row.try_get("input")?)?,
        result: decode_json(row.try_get("result")?)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let dependencies = match decode_json(row.try_get("dependencies")?)? {
        Some(Value::Null) | None => Vec::new(),
        Some(value) => serde_json::from_value(value)?,
    };
    let allowed_source_handles = match decode_json(row.try_get("allowed_source_handles")?)? {
        Some(Value::Null) | None => None,
        Some(value) => Some(serde_json::from_value(value)?),
    };
    let delay_ms: Option<i64> = row.try_get("delay_ms")?;

    Ok(Task {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        node_id: row.try_get("node_id")?,
        node_type: row.try_get("node_type")?,
        status: parse_column(row, "status")?,
        input: decode_json(row.try_get("input")?)?,
        output: decode_json(row.try_get("output")?)?,
        error: row.try_get("error")?,
        dependencies,
        allowed_source_handles,
        delay_ms: delay_ms.map(|d| d.max(0) as u64),
        external_job_id: row.try_get("job_id")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn parse_column<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: String| EngineError::Persistence(sqlx::Error::Decode(e.into())))
}

fn encode_json(value: Option<&Value>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

/// Decode a JSON column, unwrapping values that were stored string-encoded
fn decode_json(raw: Option<String>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let value: Value = serde_json::from_str(&raw)?;
    if let Value::String(inner) = &value {
        if let Ok(parsed) = serde_json::from_str::<Value>(inner) {
            if parsed.is_object() || parsed.is_array() {
                return Ok(Some(parsed));
            }
        }
    }

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteTaskStore {
        let store = SqliteTaskStore::new(memory_pool().await.unwrap());
        store.init_schema().await.unwrap();
        store
    }

    async fn seeded(store: &SqliteTaskStore) -> (Run, Vec<Task>) {
        let run = Run::new("wf", Some(json!({ "city": "Oslo" })));
        store.create_run(&run).await.unwrap();
        let tasks = vec![
            Task::pending(&run.id, "a", "inputText", vec![]),
            Task::pending(&run.id, "b", "notification", vec!["a".into()]),
            Task::pending(&run.id, "c", "notification", vec!["a".into(), "b".into()]),
        ];
        store.create_tasks(&tasks).await.unwrap();
        (run, tasks)
    }

    #[tokio::test]
    async fn pending_to_queued_happens_at_most_once() {
        let store = store().await;
        let (_, tasks) = seeded(&store).await;

        assert!(store.queue_task(&tasks[0].id, &json!({ "x": 1 })).await.unwrap());
        assert!(!store.queue_task(&tasks[0].id, &json!({ "x": 2 })).await.unwrap());

        let task = store.get_task(&tasks[0].id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.input, Some(json!({ "x": 1 })));
    }

    #[tokio::test]
    async fn task_lifecycle_persists_branch_mask_and_delay() {
        let store = store().await;
        let (run, tasks) = seeded(&store).await;
        let now = Utc::now();

        assert!(!store.start_task(&tasks[0].id, now).await.unwrap());
        store.queue_task(&tasks[0].id, &json!({})).await.unwrap();
        assert!(store.start_task(&tasks[0].id, now).await.unwrap());

        let completion = TaskCompletion {
            output: Some(json!({ "ok": true })),
            allowed_source_handles: Some(["out-yes".to_string()].into_iter().collect()),
            delay_ms: Some(1500),
        };
        assert!(store.complete_task(&tasks[0].id, &completion, now).await.unwrap());
        assert!(!store.fail_task(&tasks[0].id, "late", now).await.unwrap());

        let task = store.get_task_by_node(&run.id, "a").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.delay_ms, Some(1500));
        assert!(task.allowed_source_handles.unwrap().contains("out-yes"));

        let c = store.get_task_by_node(&run.id, "c").await.unwrap().unwrap();
        assert_eq!(c.dependencies, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(c.allowed_source_handles, None);
    }

    #[tokio::test]
    async fn skips_and_counts_by_status() {
        let store = store().await;
        let (run, tasks) = seeded(&store).await;
        let now = Utc::now();

        store.queue_task(&tasks[0].id, &json!({})).await.unwrap();
        let skipped = store
            .skip_pending_tasks(&run.id, &["a".into(), "b".into()], now)
            .await
            .unwrap();
        assert_eq!(skipped, 1);

        let counts = store.count_tasks(&run.id).await.unwrap();
        assert_eq!((counts.queued, counts.skipped, counts.pending), (1, 1, 1));

        assert_eq!(store.skip_open_tasks(&run.id, now).await.unwrap(), 2);
        assert_eq!(store.count_tasks(&run.id).await.unwrap().skipped, 3);
    }

    #[tokio::test]
    async fn run_transitions_are_guarded() {
        let store = store().await;
        let (run, _) = seeded(&store).await;
        let now = Utc::now();
        let summary = json!({ "completed": 0 });

        assert!(!store.finalize_run(&run.id, RunStatus::Succeeded, &summary, now).await.unwrap());
        assert!(store.mark_run_running(&run.id).await.unwrap());
        assert!(store.finalize_run(&run.id, RunStatus::Succeeded, &summary, now).await.unwrap());
        assert!(!store.finalize_run(&run.id, RunStatus::Failed, &summary, now).await.unwrap());
        assert!(!store.cancel_run(&run.id, &summary, now).await.unwrap());

        let stored = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert!(stored.finished_at.is_some());
        assert!(store.list_runs_by_status(RunStatus::Running).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tolerates_string_encoded_json_columns() {
        let store = store().await;
        let (run, tasks) = seeded(&store).await;

        sqlx::query("UPDATE workflow_tasks SET dependencies = ?, allowed_source_handles = ? WHERE id = ?")
            .bind(json!("[\"a\"]").to_string())
            .bind(json!("[]").to_string())
            .bind(&tasks[1].id)
            .execute(&store.pool)
            .await
            .unwrap();

        let task = store.get_task_by_node(&run.id, "b").await.unwrap().unwrap();
        assert_eq!(task.dependencies, vec!["a".to_string()]);
        assert_eq!(task.allowed_source_handles, Some(Default::default()));
    }

    #[tokio::test]
    async fn logs_come_back_in_append_order() {
        let store = store().await;
        let (run, _) = seeded(&store).await;

        store
            .append_logs(&[
                RunLog::new(&run.id, None, LogKind::System, "started", None),
                RunLog::new(&run.id, Some("a".into()), LogKind::NodeOutput, "Input: {}", Some(json!({ "kind": "input" }))),
            ])
            .await
            .unwrap();

        let logs = store.list_logs(&run.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].kind, LogKind::System);
        assert_eq!(logs[1].node_id.as_deref(), Some("a"));
    }
}
