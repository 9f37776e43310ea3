/// HTTP API Layer
///
/// REST endpoints over the scheduler's exposed operations:
/// - Starting, inspecting, cancelling and retrying executions
/// - Hot-reloading a workflow definition from storage
/// - Webhook triggers that start executions

use crate::{
    errors::SchedulerError,
    runtime::{scheduler::Scheduler, triggers::CronTriggerService},
    workflow::registry::WorkflowRegistry,
};
use axum::{http::StatusCode, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

// Execution endpoints
pub mod executions;

// Workflow reload endpoint
pub mod workflows;

// Dynamic webhook execution endpoints
pub mod webhooks;

pub use executions::create_execution_routes;
pub use webhooks::create_webhook_routes;
pub use workflows::create_workflow_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// Hot-reload registry the scheduler reads workflows from
    pub registry: Arc<WorkflowRegistry>,
    /// Cron triggers, re-registered when a workflow is reloaded
    pub triggers: Option<Arc<CronTriggerService>>,
}

pub type ApiError = (StatusCode, Json<Value>);

/// HTTP status for a scheduler error
pub fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::WorkflowNotFound(_) | SchedulerError::ExecutionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SchedulerError::InvalidGraph(_) | SchedulerError::NotRetryable { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SchedulerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a scheduler error into a JSON error response
pub fn api_error(err: SchedulerError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("❌ Request failed: {}", err);
    } else {
        tracing::debug!("Request rejected ({}): {}", status, err);
    }
    (status, Json(json!({ "error": err.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GraphError;

    #[test]
    fn maps_errors_to_statuses() {
        assert_eq!(
            status_for(&SchedulerError::ExecutionNotFound("e".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SchedulerError::InvalidGraph(GraphError::Cycle("A".into()))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&SchedulerError::ShuttingDown),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&SchedulerError::Store(anyhow::anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
