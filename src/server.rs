/// Server setup and initialization
///
/// Wires together storage, registry, scheduler, worker pool, cron triggers
/// and HTTP routes.

use crate::{
    api::{create_execution_routes, create_webhook_routes, create_workflow_routes, AppState},
    config::Config,
    database,
    execution::sqlite::SqliteExecutionStore,
    runtime::{
        executor::HttpNodeExecutor, scheduler::Scheduler, triggers::CronTriggerService,
        worker::WorkerPool,
    },
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Running engine components behind the HTTP surface
pub struct Services {
    pub state: AppState,
    pub workers: WorkerPool,
}

impl Services {
    /// Stop cron triggers, then drain the worker pool
    pub async fn shutdown(self) {
        if let Some(triggers) = &self.state.triggers {
            if let Err(e) = triggers.stop().await {
                tracing::error!("❌ Failed to stop cron triggers: {}", e);
            }
        }
        self.workers.shutdown().await;
    }
}

/// Build every engine component from configuration
pub async fn build_services(config: &Config) -> Result<Services> {
    tracing::info!("📁 Using data directory: {}", config.database.data_dir);

    tracing::info!("📋 Initializing workflow storage");
    let workflow_pool = database::connect_file(&config.database.workflows_db()).await?;
    let workflow_storage = WorkflowStorage::new(workflow_pool);
    workflow_storage.init_schema().await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(workflow_storage));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🗄️ Initializing execution store");
    let execution_pool = database::connect_file(&config.database.executions_db()).await?;
    let execution_store = SqliteExecutionStore::new(execution_pool);
    execution_store.init_schema().await?;

    tracing::info!("⚙️ Node executor endpoint: {}", config.executor.endpoint);
    let executor = HttpNodeExecutor::new(config.executor.endpoint.clone());

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        Arc::new(execution_store),
        Arc::new(executor),
        config.scheduler.to_scheduler_config(),
    ));

    let workers = WorkerPool::spawn(Arc::clone(&scheduler), config.scheduler.worker_count);

    tracing::info!("⏰ Initializing cron trigger service");
    let triggers = Arc::new(
        CronTriggerService::new(Arc::clone(&registry), Arc::clone(&scheduler))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize cron triggers: {}", e))?,
    );
    triggers.start().await?;

    Ok(Services {
        state: AppState {
            scheduler,
            registry,
            triggers: Some(triggers),
        },
        workers,
    })
}

/// Create the Axum router over shared application state
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_execution_routes())
        .merge(create_workflow_routes())
        .merge(create_webhook_routes())
        .with_state(state)
}

/// Start the HTTP server with the given configuration
///
/// Runs until Ctrl-C, then stops triggers and drains the workers.
pub async fn start_server(config: Config) -> Result<()> {
    let level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_max_level(level)
        .init();

    tracing::info!("Starting flowcore server...");

    let services = build_services(&config).await?;
    let app = create_app(services.state.clone());

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

    services.shutdown().await;
    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
