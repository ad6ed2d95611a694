/// Server setup and initialization
///
/// Wires together storage, the workflow registry, both work queues, the
/// coordinator, the dependency scheduler and the HTTP routes.

use crate::{
    api::{create_run_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{
        DependencyJob, DependencyScheduler, ExecutionEngine, ExecutorRegistry, JobHandler,
        JobQueue, LocalQueue, RunService, TaskCoordinator, TaskJob,
    },
    store::{sqlite, SqliteTaskStore, TaskStore},
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Fully wired engine: registry, run service and the queues feeding it
pub struct Runtime {
    pub registry: Arc<WorkflowRegistry>,
    pub runs: Arc<RunService>,
    pub task_queue: Arc<LocalQueue<TaskJob>>,
    pub dependency_queue: Arc<LocalQueue<DependencyJob>>,
}

impl Runtime {
    /// Build every component on top of `pool`, start the worker pools and
    /// resume runs left in flight by a previous process.
    pub async fn start(config: &Config, pool: SqlitePool) -> Result<Self> {
        tracing::info!("📋 Initializing workflow storage");
        let workflow_storage = WorkflowStorage::new(pool.clone());
        workflow_storage.init_schema().await?;

        tracing::info!("🗃️ Initializing run store");
        let task_store = SqliteTaskStore::new(pool);
        task_store.init_schema().await?;
        let store: Arc<dyn TaskStore> = Arc::new(task_store);

        tracing::info!("📊 Initializing workflow registry");
        let registry = Arc::new(WorkflowRegistry::new(workflow_storage));
        registry
            .init_from_storage()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

        tracing::info!("⚙️ Registering node executors");
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        let executors = Arc::new(ExecutorRegistry::with_builtins(
            client,
            Duration::from_millis(config.http.default_timeout_ms),
        ));
        tracing::debug!("Node types: {:?}", executors.node_types());

        let task_queue = Arc::new(LocalQueue::<TaskJob>::new(
            "workflow-tasks",
            config.queue.task_retry,
        ));
        let dependency_queue = Arc::new(LocalQueue::<DependencyJob>::new(
            "workflow-dependencies",
            config.queue.dependency_retry,
        ));

        let scheduler = Arc::new(DependencyScheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&task_queue) as Arc<dyn JobQueue<TaskJob>>,
        ));
        let coordinator = Arc::new(TaskCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&executors),
            Arc::clone(&dependency_queue) as Arc<dyn JobQueue<DependencyJob>>,
        ));
        let runs = Arc::new(RunService::new(
            store,
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            ExecutionEngine::new(executors),
        ));

        tracing::info!("🚀 Starting work queues");
        task_queue
            .start(coordinator as Arc<dyn JobHandler<TaskJob>>, config.queue.task_workers)
            .await;
        dependency_queue
            .start(
                scheduler as Arc<dyn JobHandler<DependencyJob>>,
                config.queue.dependency_workers,
            )
            .await;

        tracing::info!("♻️ Recovering in-flight runs");
        runs.recover().await?;

        Ok(Self {
            registry,
            runs,
            task_queue,
            dependency_queue,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            runs: Arc::clone(&self.runs),
        }
    }

    /// Stop both worker pools. Queued jobs are dropped; `recover` picks
    /// their tasks up again on the next start.
    pub async fn shutdown(&self) {
        self.task_queue.shutdown().await;
        self.dependency_queue.shutdown().await;
    }
}

/// Create the main Axum application over an already started runtime
pub fn create_app(runtime: &Runtime) -> Router {
    tracing::info!("📡 Creating HTTP router with all endpoints");
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes().with_state(runtime.app_state()))
        .merge(create_run_routes().with_state(runtime.app_state()))
}

/// Start the HTTP server with the given configuration
///
/// Opens the database, starts the runtime and serves until Ctrl-C, then
/// stops the worker pools.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Runway server...");

    let pool = sqlite::connect(&config.database.url).await?;
    let runtime = Runtime::start(&config, pool).await?;
    let app = create_app(&runtime);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    runtime.shutdown().await;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
