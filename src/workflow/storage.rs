/// SQLite persistence layer for workflow storage
///
/// The editing layer owns these rows; the execution core only reads them.
/// Workflows are stored as JSON for flexibility while keeping indexed lookup
/// fields.

use crate::workflow::{types::Workflow, WorkflowSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, FromRow};
use std::collections::HashMap;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        definition JSON NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workflows_workspace ON workflows(workspace_id)",
];

/// Stored definition column, decoded lazily
#[derive(FromRow)]
struct DefinitionRow {
    id: String,
    definition: String,
}

impl DefinitionRow {
    fn decode(self) -> Result<Workflow> {
        serde_json::from_str(&self.definition)
            .with_context(|| format!("corrupt definition for workflow '{}'", self.id))
    }
}

/// Listing row; the definition itself is not loaded
#[derive(Debug, Serialize, FromRow)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub workspace_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Workflow definitions in SQLite
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the table and index (idempotent)
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert or replace a definition, bumping `updated_at`
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let definition = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, workspace_id, definition, updated_at)
            VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                workspace_id = excluded.workspace_id,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.workspace_id)
        .bind(definition)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Saved workflow {} ({} nodes)", workflow.id, workflow.nodes.len());
        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        sqlx::query_as::<_, DefinitionRow>("SELECT id, definition FROM workflows WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(DefinitionRow::decode)
            .transpose()
    }

    /// Metadata for every stored workflow, most recently updated first
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query_as::<_, WorkflowMetadata>(
            r#"
            SELECT id, name, workspace_id,
                   CAST(created_at AS TEXT) AS created_at,
                   CAST(updated_at AS TEXT) AS updated_at
            FROM workflows
            ORDER BY updated_at DESC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Every definition keyed by id, for registry start-up
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query_as::<_, DefinitionRow>("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Ok((row.id.clone(), row.decode()?)))
            .collect()
    }

    /// Returns whether a row was removed
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl WorkflowSource for WorkflowStorage {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        WorkflowStorage::get_workflow(self, workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect_memory;
    use crate::workflow::types::{Edge, Node};
    use serde_json::Map;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            name: id.to_string(),
            script_ref: format!("scripts/{}.py", id),
            input_params: Vec::new(),
            params: Map::new(),
            max_retries: 0,
            timeout_seconds: 30,
            priority: None,
        }
    }

    fn workflow(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: format!("{} workflow", id),
            workspace_id: "ws-1".to_string(),
            priority: 0,
            max_retries: 0,
            timeout_seconds: None,
            nodes: vec![node("A"), node("B")],
            edges: vec![Edge::new("A", "B")],
            triggers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_then_read_through_source_trait() {
        let storage = WorkflowStorage::new(connect_memory().await.unwrap());
        storage.init_schema().await.unwrap();
        storage.save_workflow(&workflow("wf-1")).await.unwrap();

        let source: &dyn WorkflowSource = &storage;
        let nodes = source.get_nodes("wf-1").await.unwrap();
        let edges = source.get_edges("wf-1").await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(edges, vec![Edge::new("A", "B")]);
        assert!(source.get_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_and_delete() {
        let storage = WorkflowStorage::new(connect_memory().await.unwrap());
        storage.init_schema().await.unwrap();

        let mut wf = workflow("wf-2");
        storage.save_workflow(&wf).await.unwrap();
        wf.name = "renamed".to_string();
        storage.save_workflow(&wf).await.unwrap();

        let listed = storage.list_workflows().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "renamed");

        assert!(storage.delete_workflow("wf-2").await.unwrap());
        assert!(!storage.delete_workflow("wf-2").await.unwrap());
        assert!(storage.load_all_workflows().await.unwrap().is_empty());
    }
}
