/// Durable run control endpoints

use crate::api::{reject, AppState};
use crate::runtime::RunDetails;
use crate::store::Run;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/runs", post(start_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/runs/{id}/recheck", post(recheck_run))
}

/// Start an asynchronous run
///
/// POST /api/workflows/{id}/runs
/// Body: initial input payload
/// Returns: 202 { "runId": "..." }
async fn start_run(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(input): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let run_id = state
        .runs
        .start_run(&workflow_id, input)
        .await
        .map_err(|e| reject("Failed to start run", e))?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "runId": run_id }))))
}

/// GET /api/runs/{id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunDetails>, StatusCode> {
    state
        .runs
        .get_run_status(&run_id)
        .await
        .map(Json)
        .map_err(|e| reject("Failed to load run", e))
}

/// POST /api/runs/{id}/cancel
async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state
        .runs
        .cancel_run(&run_id)
        .await
        .map_err(|e| reject("Failed to cancel run", e))?;

    Ok(Json(json!({ "runId": run_id, "status": "failed", "cancelled": true })))
}

/// POST /api/runs/{id}/recheck
async fn recheck_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, StatusCode> {
    state
        .runs
        .recheck_run(&run_id)
        .await
        .map(Json)
        .map_err(|e| reject("Failed to re-check run", e))
}
