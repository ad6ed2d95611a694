/// HTTP API Layer
///
/// Thin axum wrappers over the run control surface:
/// - Workflow registration with hot-reload
/// - Synchronous execution
/// - Durable run start, status, cancel and re-check

// Workflow registration and synchronous execution
pub mod workflows;

// Durable run control
pub mod runs;

use crate::error::EngineError;
use crate::runtime::RunService;
use crate::workflow::WorkflowRegistry;
use axum::http::StatusCode;
use std::sync::Arc;

pub use runs::create_run_routes;
pub use workflows::create_workflow_routes;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Hot-reload registry for in-memory workflows
    pub registry: Arc<WorkflowRegistry>,
    /// Durable and synchronous run control
    pub runs: Arc<RunService>,
}

/// Map an engine error to the HTTP status a caller sees
pub fn error_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        EngineError::InvalidWorkflow(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log an engine error and convert it to a status code
pub(crate) fn reject(context: &str, error: EngineError) -> StatusCode {
    let status = error_status(&error);
    if status.is_server_error() {
        tracing::error!("❌ {}: {}", context, error);
    } else {
        tracing::debug!("{}: {}", context, error);
    }
    status
}
