/// Workflow Management Layer
///
/// Read-only access to workflow graphs for the execution core:
/// - Type definitions (Workflow, Node, Edge, parameter schema)
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

use anyhow::Result;
use async_trait::async_trait;

// Core workflow type definitions
pub mod types;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use storage::WorkflowStorage;
pub use types::{CronTrigger, Edge, InputParamDef, Node, ParamType, Workflow};

/// Workflow graph reader consumed by the scheduler
///
/// The scheduler reads whole workflows through `get_workflow`, since it also
/// needs priority, retry and timeout settings. `get_nodes` and `get_edges`
/// are the graph-only view for collaborators that just walk the DAG; an
/// unknown workflow reads as an empty graph.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>>;

    async fn get_nodes(&self, workflow_id: &str) -> Result<Vec<Node>> {
        Ok(self
            .get_workflow(workflow_id)
            .await?
            .map(|w| w.nodes)
            .unwrap_or_default())
    }

    async fn get_edges(&self, workflow_id: &str) -> Result<Vec<Edge>> {
        Ok(self
            .get_workflow(workflow_id)
            .await?
            .map(|w| w.edges)
            .unwrap_or_default())
    }
}
