/// Workflow hot-reload endpoint
///
/// Workflow definitions are edited elsewhere and written to storage; this
/// endpoint pulls one back into the registry and re-registers its cron
/// triggers. Executions already running keep the graph they started with.

use crate::api::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new().route("/api/workflows/{id}/reload", post(reload_workflow))
}

/// POST /api/workflows/{id}/reload
async fn reload_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let reloaded = state
        .registry
        .reload_workflow(&workflow_id)
        .await
        .map_err(|e| {
            tracing::warn!("⚠️ Failed to reload workflow {}: {}", workflow_id, e);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            )
        })?;

    let Some(compiled) = reloaded else {
        if let Some(triggers) = &state.triggers {
            triggers.remove_workflow_triggers(&workflow_id).await;
        }
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("workflow not found: {}", workflow_id) })),
        ));
    };

    if let Some(triggers) = &state.triggers {
        if let Err(e) = triggers
            .add_or_update_workflow_triggers(&compiled.workflow)
            .await
        {
            tracing::error!("❌ Failed to register cron triggers for {}: {}", workflow_id, e);
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            ));
        }
    }

    tracing::info!("🔥 Reloaded workflow: {} ({})", compiled.workflow.id, compiled.workflow.name);

    Ok(Json(json!({
        "id": compiled.workflow.id,
        "nodes": compiled.graph.len(),
        "triggers": compiled.workflow.triggers.len(),
    })))
}
