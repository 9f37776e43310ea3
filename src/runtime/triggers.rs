/// Cron trigger service
///
/// Registers every `Workflow.triggers` entry with tokio-cron-scheduler. Each
/// firing starts a new execution whose trigger data is the trigger's payload
/// plus a `fired_at` timestamp. Triggers are hot-swapped per workflow: the
/// job UUID map lets a reload remove exactly the jobs it replaces.

use crate::{
    errors::SchedulerError,
    runtime::scheduler::Scheduler,
    workflow::{
        registry::WorkflowRegistry,
        types::{CronTrigger, Workflow},
    },
};
use anyhow::Result;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Trigger data for one cron firing
pub fn cron_trigger_data(payload: &Value, fired_at: chrono::DateTime<chrono::Utc>) -> Value {
    let mut data = match payload {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };
    data.insert("fired_at".to_string(), json!(fired_at.to_rfc3339()));
    Value::Object(data)
}

fn job_key(workflow_id: &str, trigger_id: &str) -> String {
    format!("{}:{}", workflow_id, trigger_id)
}

pub struct CronTriggerService {
    jobs: Arc<RwLock<JobScheduler>>,
    /// Key: "{workflow_id}:{trigger_id}"
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    registry: Arc<WorkflowRegistry>,
    scheduler: Arc<Scheduler>,
}

impl CronTriggerService {
    pub async fn new(registry: Arc<WorkflowRegistry>, scheduler: Arc<Scheduler>) -> Result<Self> {
        let jobs = JobScheduler::new().await?;

        Ok(Self {
            jobs: Arc::new(RwLock::new(jobs)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            registry,
            scheduler,
        })
    }

    /// Register triggers of every registered workflow and start firing
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron trigger service");

        let workflows = self.registry.get_all_workflows();
        let mut total = 0;
        for workflow in &workflows {
            if workflow.triggers.is_empty() {
                continue;
            }
            match self.add_or_update_workflow_triggers(workflow).await {
                Ok(()) => total += workflow.triggers.len(),
                Err(e) => tracing::warn!(
                    "⚠️ Skipping cron triggers of workflow {}: {}",
                    workflow.id,
                    e
                ),
            }
        }

        self.jobs.read().await.start().await?;

        tracing::info!(
            "📊 Registered {} cron triggers from {} workflows",
            total,
            workflows.len()
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron trigger service");

        self.job_uuid_map.write().await.clear();
        self.jobs.write().await.shutdown().await?;

        tracing::info!("✅ Cron trigger service stopped");
        Ok(())
    }

    /// Number of cron jobs currently registered
    pub async fn job_count(&self) -> usize {
        self.job_uuid_map.read().await.len()
    }

    /// Replace all cron jobs of `workflow` with its current triggers
    pub async fn add_or_update_workflow_triggers(&self, workflow: &Workflow) -> Result<()> {
        self.remove_workflow_triggers(&workflow.id).await;

        for trigger in &workflow.triggers {
            self.add_job(&workflow.id, trigger).await?;
        }

        if !workflow.triggers.is_empty() {
            tracing::info!(
                "🔥 Hot-reloaded {} cron triggers for workflow: {}",
                workflow.triggers.len(),
                workflow.id
            );
        }
        Ok(())
    }

    pub async fn remove_workflow_triggers(&self, workflow_id: &str) {
        let prefix = format!("{}:", workflow_id);
        let mut job_uuid_map = self.job_uuid_map.write().await;
        let keys: Vec<String> = job_uuid_map
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();

        for key in keys {
            if let Some(job_uuid) = job_uuid_map.remove(&key) {
                let jobs = self.jobs.read().await;
                if let Err(e) = jobs.remove(&job_uuid).await {
                    tracing::warn!("⚠️ Failed to remove cron job {}: {}", key, e);
                } else {
                    tracing::debug!("🛑 Removed cron job: {}", key);
                }
            }
        }
    }

    async fn add_job(&self, workflow_id: &str, trigger: &CronTrigger) -> Result<()> {
        let key = job_key(workflow_id, &trigger.id);
        let workflow_id = workflow_id.to_string();
        let trigger_id = trigger.id.clone();
        let payload = trigger.payload.clone();
        let scheduler = Arc::clone(&self.scheduler);

        let job = Job::new_async(trigger.schedule.as_str(), move |_uuid, _l| {
            let workflow_id = workflow_id.clone();
            let trigger_id = trigger_id.clone();
            let trigger_data = cron_trigger_data(&payload, chrono::Utc::now());
            let scheduler = Arc::clone(&scheduler);

            Box::pin(async move {
                tracing::debug!("🔔 Cron trigger {} fired for workflow {}", trigger_id, workflow_id);

                match scheduler
                    .start_execution(&workflow_id, trigger_data, Some(trigger_id.clone()))
                    .await
                {
                    Ok(execution_id) => {
                        tracing::info!(
                            "🚀 Cron trigger {} started execution {}",
                            trigger_id,
                            execution_id
                        );
                    }
                    Err(SchedulerError::WorkflowNotFound(_)) => {
                        tracing::debug!("⏭️ Skipping cron trigger for removed workflow: {}", workflow_id);
                    }
                    Err(e) => {
                        tracing::error!(
                            "❌ Cron trigger {} failed to start workflow {}: {}",
                            trigger_id,
                            workflow_id,
                            e
                        );
                    }
                }
            })
        })?;

        let job_uuid = self.jobs.read().await.add(job).await?;
        self.job_uuid_map.write().await.insert(key.clone(), job_uuid);

        tracing::debug!("⏰ Registered cron job {} ({})", key, trigger.schedule);
        Ok(())
    }
}
