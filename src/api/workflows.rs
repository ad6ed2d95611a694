/// Workflow registration and synchronous execution endpoints
///
/// Registering a workflow validates its graph, persists it and hot-swaps it
/// into the registry, so runs started afterwards see the new definition.

use crate::api::{reject, AppState};
use crate::workflow::types::Workflow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow registration
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow registration
#[derive(Debug, Deserialize)]
pub struct RegisterWorkflowRequest {
    pub workflow: Workflow,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}", get(get_workflow).put(register_workflow))
        .route("/api/workflows/{id}/execute", post(execute_workflow))
}

/// Register or replace a workflow
///
/// PUT /api/workflows/{id}
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn register_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RegisterWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let mut workflow = payload.workflow;

    // The URL is authoritative for the id
    workflow.id = id;

    let name = workflow.name.clone();
    let id = workflow.id.clone();
    state
        .registry
        .save_and_reload(workflow)
        .await
        .map_err(|e| reject("Failed to register workflow", e))?;

    tracing::info!("🔥 Registered workflow: {} ({})", id, name);

    Ok(Json(WorkflowResponse {
        message: format!("Workflow '{}' registered", id),
        id,
    }))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, StatusCode> {
    state
        .registry
        .get_workflow(&id)
        .map(|compiled| Json(compiled.workflow.clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Run a workflow synchronously
///
/// POST /api/workflows/{id}/execute
/// Body: initial input payload
/// Returns: { "logs": [{ "kind": "...", "nodeId": "...", "name": "...", "content": "..." }] }
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let logs = state
        .runs
        .execute_sync(&id, input)
        .await
        .map_err(|e| reject("Failed to execute workflow", e))?;

    Ok(Json(json!({ "logs": logs })))
}
