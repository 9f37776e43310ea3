/// Dynamic webhook trigger endpoints
///
/// Any request to `/webhook/{workflow_id}/{path}` starts an execution of the
/// workflow. The JSON body becomes `trigger_data` (empty body → `{}`) and the
/// trigger id records which path fired it.

use crate::api::{api_error, ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{any, Router},
};
use serde_json::{json, Value};

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new()
        // Format: /webhook/{workflow_id}/{webhook_path}
        .route("/webhook/{workflow_id}/{*path}", any(execute_webhook))
}

/// `/orders/new` and `orders/new` name the same trigger
pub fn webhook_trigger_id(path: &str) -> String {
    format!("webhook:/{}", path.trim_start_matches('/'))
}

/// ANY /webhook/{workflow_id}/{webhook_path}
async fn execute_webhook(
    State(state): State<AppState>,
    Path((workflow_id, webhook_path)): Path<(String, String)>,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::info!("📥 Webhook request received: {}/{}", workflow_id, webhook_path);

    let payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(
                "❌ Invalid JSON payload for webhook: {}/{} - Error: {}",
                workflow_id,
                webhook_path,
                e
            );
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON body: {}", e) })),
            )
        })?
    };

    let execution_id = state
        .scheduler
        .start_execution(&workflow_id, payload, Some(webhook_trigger_id(&webhook_path)))
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution_id })),
    ))
}
