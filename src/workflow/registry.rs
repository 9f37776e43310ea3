/// Hot-reload workflow registry using ArcSwap
///
/// Provides lock-free, atomic updates to the in-memory workflow registry.
/// Each update swaps the entire registry pointer, so executions that already
/// read a workflow keep their snapshot while new executions see the update.

use crate::runtime::graph::DependencyGraph;
use crate::workflow::{storage::WorkflowStorage, types::Workflow, WorkflowSource};
use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

/// Lock-free workflow registry for hot-reload capabilities
///
/// The registry is the in-memory source of truth for the workflows the
/// scheduler may start. It is optionally backed by persistent storage for
/// startup loading and reloads.
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: compiled workflow definition
    workflows: ArcSwap<HashMap<String, CompiledWorkflow>>,

    /// Persistent storage for reload operations
    storage: Option<WorkflowStorage>,
}

/// Workflow with its validated dependency graph
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    /// Base workflow definition
    pub workflow: Workflow,

    /// Dependency graph; building it rejects cycles and dangling edges
    pub graph: Arc<DependencyGraph>,
}

impl CompiledWorkflow {
    pub fn compile(workflow: Workflow) -> Result<Self> {
        let graph = DependencyGraph::build(&workflow.nodes, &workflow.edges)
            .map_err(|e| anyhow::anyhow!("Workflow '{}' is invalid: {}", workflow.id, e))?;

        Ok(Self {
            workflow,
            graph: Arc::new(graph),
        })
    }
}

impl WorkflowRegistry {
    /// Create new registry instance with storage backend
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage: Some(storage),
        }
    }

    /// Registry that only holds workflows registered in-process
    pub fn in_memory() -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage: None,
        }
    }

    /// Initialize registry by loading all workflows from storage
    ///
    /// Workflows that fail to compile are skipped with a warning so one bad
    /// definition does not keep the rest from loading.
    pub async fn init_from_storage(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let stored_workflows = storage.load_all_workflows().await?;
        let mut compiled = HashMap::new();

        for (id, workflow) in stored_workflows {
            match CompiledWorkflow::compile(workflow) {
                Ok(c) => {
                    compiled.insert(id, c);
                }
                Err(e) => tracing::warn!("⚠️ Skipping workflow '{}': {}", id, e),
            }
        }

        self.workflows.store(Arc::new(compiled));

        tracing::info!(
            "Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Register (or replace) a workflow directly
    pub fn register(&self, workflow: Workflow) -> Result<CompiledWorkflow> {
        let compiled = CompiledWorkflow::compile(workflow)?;

        let current = self.workflows.load();
        let mut new_registry = (**current).clone();
        new_registry.insert(compiled.workflow.id.clone(), compiled.clone());
        self.workflows.store(Arc::new(new_registry));

        tracing::info!("Registered workflow: {}", compiled.workflow.id);

        Ok(compiled)
    }

    /// Hot-reload a single workflow from storage
    ///
    /// A workflow no longer in storage is dropped from the registry and
    /// `None` is returned.
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<Option<CompiledWorkflow>> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Registry has no storage backend"))?;

        let Some(workflow) = storage.get_workflow(workflow_id).await? else {
            self.remove_workflow(workflow_id);
            return Ok(None);
        };

        let compiled = self.register(workflow)?;
        tracing::info!("Hot-reloaded workflow: {}", workflow_id);

        Ok(Some(compiled))
    }

    /// Get a workflow by ID (lock-free read)
    pub fn get_compiled(&self, workflow_id: &str) -> Option<CompiledWorkflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Get all workflows (used by the cron trigger service)
    pub fn get_all_workflows(&self) -> Vec<Workflow> {
        self.workflows
            .load()
            .values()
            .map(|compiled| compiled.workflow.clone())
            .collect()
    }

    /// List all active workflow IDs
    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    /// Remove a workflow from registry
    pub fn remove_workflow(&self, workflow_id: &str) -> bool {
        let current = self.workflows.load();
        let mut new_registry = (**current).clone();

        if new_registry.remove(workflow_id).is_some() {
            self.workflows.store(Arc::new(new_registry));
            tracing::info!("Removed workflow from registry: {}", workflow_id);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl WorkflowSource for WorkflowRegistry {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        Ok(self.get_compiled(workflow_id).map(|c| c.workflow))
    }
}
