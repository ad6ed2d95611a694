/// Work queues connecting the coordinator and the dependency scheduler
///
/// `JobQueue` is the producer side the scheduler and coordinator are handed
/// at construction. `LocalQueue` is the in-process implementation: a priority
/// heap drained by a pool of tokio workers, with timer-driven delays and
/// bounded exponential retry for infrastructure failures.

use crate::config::RetryPolicy;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Task-execution job: run one queued task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskJob {
    pub task_id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_type: String,
    pub input: Value,
}

/// Dependency-check job: propagate from one finished node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyJob {
    pub run_id: String,
    pub completed_node_id: String,
}

/// Per-job scheduling options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Hold the job back for this long before it becomes runnable
    pub delay: Option<Duration>,
    /// Higher runs first among ready jobs
    pub priority: i32,
}

impl JobOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait JobQueue<J>: Send + Sync {
    /// Submit a job and return its queue-assigned id
    async fn enqueue(&self, job: J, options: JobOptions) -> Result<String>;
}

#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    /// Process one job. Retryable errors are redelivered with backoff.
    async fn handle(&self, job: &J) -> Result<()>;
}

struct Envelope<J> {
    id: String,
    job: J,
    priority: i32,
    attempt: u32,
    seq: u64,
}

impl<J> PartialEq for Envelope<J> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<J> Eq for Envelope<J> {}

impl<J> PartialOrd for Envelope<J> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<J> Ord for Envelope<J> {
    /// Max-heap order: higher priority, then earlier submission
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner<J> {
    name: &'static str,
    ready: Mutex<BinaryHeap<Envelope<J>>>,
    notify: Notify,
    seq: AtomicU64,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<J: Send + 'static> QueueInner<J> {
    async fn push(&self, envelope: Envelope<J>) {
        self.ready.lock().await.push(envelope);
        self.notify.notify_one();
    }

    /// Push now, or after `delay` from a timer task
    fn schedule(self: &Arc<Self>, envelope: Envelope<J>, delay: Option<Duration>) {
        let inner = Arc::clone(self);
        match delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::select! {
                        _ = inner.cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => inner.push(envelope).await,
                    }
                });
            }
            None => {
                tokio::spawn(async move { inner.push(envelope).await });
            }
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, AtomicOrdering::SeqCst)
    }
}

/// In-process priority/delay queue drained by a worker pool
pub struct LocalQueue<J> {
    inner: Arc<QueueInner<J>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Send + Sync + 'static> LocalQueue<J> {
    pub fn new(name: &'static str, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                ready: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                retry,
                cancel: CancellationToken::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `workers` tokio tasks that feed ready jobs to `handler`
    pub async fn start(&self, handler: Arc<dyn JobHandler<J>>, workers: usize) {
        let mut handles = self.workers.lock().await;
        for worker_id in 0..workers.max(1) {
            let inner = Arc::clone(&self.inner);
            let handler = Arc::clone(&handler);
            handles.push(tokio::spawn(worker_loop(inner, handler, worker_id)));
        }
        tracing::info!("🧵 Queue '{}' started with {} workers", self.inner.name, workers.max(1));
    }

    /// Jobs that are runnable now (delayed and in-flight jobs excluded)
    pub async fn ready_len(&self) -> usize {
        self.inner.ready.lock().await.len()
    }

    /// Stop accepting jobs and stop every worker
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        for handle in self.workers.lock().await.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("⚠️ Queue '{}' worker ended abnormally: {}", self.inner.name, e);
            }
        }
        tracing::info!("🛑 Queue '{}' shut down", self.inner.name);
    }
}

#[async_trait]
impl<J: Send + Sync + 'static> JobQueue<J> for LocalQueue<J> {
    async fn enqueue(&self, job: J, options: JobOptions) -> Result<String> {
        if self.inner.cancel.is_cancelled() {
            return Err(EngineError::Queue(format!("queue '{}' is shut down", self.inner.name)));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let envelope = Envelope {
            id: id.clone(),
            job,
            priority: options.priority,
            attempt: 1,
            seq: self.inner.next_seq(),
        };

        match options.delay.filter(|d| !d.is_zero()) {
            Some(delay) => self.inner.schedule(envelope, Some(delay)),
            None => self.inner.push(envelope).await,
        }

        Ok(id)
    }
}

async fn worker_loop<J: Send + Sync + 'static>(
    inner: Arc<QueueInner<J>>,
    handler: Arc<dyn JobHandler<J>>,
    worker_id: usize,
) {
    loop {
        let next = inner.ready.lock().await.pop();

        let mut envelope = match next {
            Some(envelope) => envelope,
            None => {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = inner.notify.notified() => {}
                }
                continue;
            }
        };

        if inner.cancel.is_cancelled() {
            break;
        }

        match handler.handle(&envelope.job).await {
            Ok(()) => {
                tracing::debug!(
                    "Queue '{}' worker {} finished job {}",
                    inner.name,
                    worker_id,
                    envelope.id
                );
            }
            Err(e) if e.is_retryable() && envelope.attempt < inner.retry.attempts => {
                let backoff = inner.retry.backoff_for(envelope.attempt);
                tracing::warn!(
                    "🔁 Queue '{}' job {} failed on attempt {}/{}: {} (retrying in {:?})",
                    inner.name,
                    envelope.id,
                    envelope.attempt,
                    inner.retry.attempts,
                    e,
                    backoff
                );
                envelope.attempt += 1;
                envelope.seq = inner.next_seq();
                inner.schedule(envelope, Some(backoff));
            }
            Err(e) => {
                tracing::error!(
                    "❌ Queue '{}' dropped job {} after attempt {}: {}",
                    inner.name,
                    envelope.id,
                    envelope.attempt,
                    e
                );
            }
        }
    }

    tracing::debug!("Queue '{}' worker {} stopped", inner.name, worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    struct Collect(mpsc::UnboundedSender<u32>);

    #[async_trait]
    impl JobHandler<u32> for Collect {
        async fn handle(&self, job: &u32) -> Result<()> {
            self.0.send(*job).map_err(|e| EngineError::Queue(e.to_string()))
        }
    }

    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
        error: fn() -> EngineError,
    }

    #[async_trait]
    impl JobHandler<u32> for Flaky {
        async fn handle(&self, _job: &u32) -> Result<()> {
            let call = self.calls.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            if call <= self.fail_times {
                Err((self.error)())
            } else {
                Ok(())
            }
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy { attempts, backoff_ms: 10 }
    }

    #[tokio::test]
    async fn ready_jobs_run_by_priority_then_fifo() {
        let queue = LocalQueue::new("test", policy(1));
        for (job, priority) in [(1, 0), (2, 5), (3, 0), (4, 5)] {
            queue.enqueue(job, JobOptions { delay: None, priority }).await.unwrap();
        }
        assert_eq!(queue.ready_len().await, 4);

        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.start(Arc::new(Collect(tx)), 1).await;

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![2, 4, 1, 3]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn delayed_jobs_wait_for_their_timer() {
        let queue = LocalQueue::new("test", policy(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.start(Arc::new(Collect(tx)), 2).await;

        queue.enqueue(1, JobOptions::delayed(Duration::from_millis(150))).await.unwrap();
        queue.enqueue(2, JobOptions::default()).await.unwrap();

        assert_eq!(rx.recv().await, Some(2));
        let started = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some(1));
        assert!(started.elapsed() >= Duration::from_millis(50));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn retries_only_retryable_errors() {
        let retryable = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: 2,
            error: || EngineError::Queue("transient".into()),
        });
        let fatal = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: 5,
            error: || EngineError::not_found("task", "t1"),
        });

        let q1 = LocalQueue::new("retry", policy(3));
        let q2 = LocalQueue::new("fatal", policy(3));
        q1.start(retryable.clone(), 1).await;
        q2.start(fatal.clone(), 1).await;
        q1.enqueue(1, JobOptions::default()).await.unwrap();
        q2.enqueue(1, JobOptions::default()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(retryable.calls.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(fatal.calls.load(AtomicOrdering::SeqCst), 1);
        q1.shutdown().await;
        q2.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_jobs_after_shutdown() {
        let queue: LocalQueue<u32> = LocalQueue::new("test", policy(1));
        queue.shutdown().await;
        assert!(matches!(
            queue.enqueue(1, JobOptions::default()).await,
            Err(EngineError::Queue(_))
        ));
    }
}
