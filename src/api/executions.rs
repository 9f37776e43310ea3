/// Execution REST API endpoints
///
/// Thin handlers over the scheduler's public operations. Node-level failures
/// never show up here as HTTP errors; they are part of the execution record.

use crate::api::{api_error, ApiError, AppState};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for starting an execution
#[derive(Debug, Default, Deserialize)]
pub struct StartExecutionRequest {
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default)]
    pub trigger_id: Option<String>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/executions", post(start_execution))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/inputs", get(get_execution_inputs))
        .route("/api/executions/{id}/outputs", get(get_execution_outputs))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
        .route("/api/executions/{id}/retry", post(retry_execution))
}

/// POST /api/workflows/{id}/executions
/// Body: { "trigger_data": {...}, "trigger_id": "..." }
async fn start_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<StartExecutionRequest>,
) -> Result<Json<Value>, ApiError> {
    let execution_id = state
        .scheduler
        .start_execution(&workflow_id, request.trigger_data, request.trigger_id)
        .await
        .map_err(api_error)?;

    Ok(Json(json!({ "execution_id": execution_id })))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let execution = state
        .scheduler
        .get_execution(&execution_id)
        .await
        .map_err(api_error)?;

    Ok(Json(json!(execution)))
}

/// GET /api/executions/{id}/inputs
async fn get_execution_inputs(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let inputs = state
        .scheduler
        .get_execution_inputs(&execution_id)
        .await
        .map_err(api_error)?;

    Ok(Json(json!({ "inputs": inputs })))
}

/// GET /api/executions/{id}/outputs
async fn get_execution_outputs(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let outputs = state
        .scheduler
        .get_execution_outputs(&execution_id)
        .await
        .map_err(api_error)?;

    Ok(Json(json!({ "outputs": outputs })))
}

/// POST /api/executions/{id}/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = state
        .scheduler
        .cancel_execution(&execution_id)
        .await
        .map_err(api_error)?;

    tracing::info!("🛑 Cancel requested for {} (accepted: {})", execution_id, cancelled);
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// POST /api/executions/{id}/retry
async fn retry_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let new_id = state
        .scheduler
        .retry_execution(&execution_id)
        .await
        .map_err(api_error)?;

    Ok(Json(json!({ "execution_id": new_id })))
}
