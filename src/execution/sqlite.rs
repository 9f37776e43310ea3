/// SQLite persistence for executions and their working rows
///
/// Claims and dependency decrements are single `UPDATE … RETURNING`
/// statements, so SQLite's write lock makes each of them atomic per row
/// without an explicit transaction.

use crate::execution::store::ExecutionStore;
use crate::execution::types::{
    Execution, ExecutionInput, ExecutionOutput, ExecutionStatus, InputState, NodeStatus,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

/// sqlx-backed execution store
#[derive(Debug, Clone)]
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the execution tables (idempotent)
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                trigger_id TEXT,
                status TEXT NOT NULL,
                trigger_data JSON NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                results JSON NOT NULL,
                retry_count INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                is_retry INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_inputs (
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                state TEXT NOT NULL,
                dependency_count INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                wait_factor REAL NOT NULL,
                params JSON NOT NULL,
                max_retries INTEGER NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                resource_retry_count INTEGER NOT NULL,
                last_rejection_reason TEXT,
                claimed_by TEXT,
                queued_at_ms INTEGER NOT NULL,
                available_at_ms INTEGER NOT NULL,
                PRIMARY KEY (execution_id, node_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_inputs_claimable
            ON execution_inputs(state, dependency_count, priority)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_outputs (
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                status TEXT NOT NULL,
                result_data JSON,
                started_at TEXT,
                ended_at TEXT,
                duration_ms INTEGER,
                error_message TEXT,
                error_details JSON,
                retry_count INTEGER NOT NULL,
                PRIMARY KEY (execution_id, node_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn to_ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn from_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| anyhow::anyhow!("invalid timestamp '{}': {}", s, e))
        })
        .transpose()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("invalid timestamp: {}", ms))
}

fn from_json<T: serde::de::DeserializeOwned>(value: Option<String>) -> Result<Option<T>> {
    value
        .map(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
        .transpose()
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(|v| serde_json::to_string(v).map_err(anyhow::Error::from))
        .transpose()
}

fn execution_from_row(row: &SqliteRow) -> Result<Execution> {
    let status: String = row.get("status");
    let trigger_data: String = row.get("trigger_data");
    let results: String = row.get("results");

    Ok(Execution {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        workspace_id: row.get("workspace_id"),
        trigger_id: row.get("trigger_id"),
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown execution status: {}", status))?,
        trigger_data: serde_json::from_str(&trigger_data)?,
        created_at: from_ts(Some(row.get("created_at")))?
            .ok_or_else(|| anyhow::anyhow!("missing created_at"))?,
        started_at: from_ts(row.get("started_at"))?,
        ended_at: from_ts(row.get("ended_at"))?,
        results: serde_json::from_str(&results)?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        is_retry: row.get("is_retry"),
    })
}

fn input_from_row(row: &SqliteRow) -> Result<ExecutionInput> {
    let state: String = row.get("state");
    let params: String = row.get("params");

    Ok(ExecutionInput {
        execution_id: row.get("execution_id"),
        node_id: row.get("node_id"),
        state: InputState::parse(&state)
            .ok_or_else(|| anyhow::anyhow!("unknown input state: {}", state))?,
        dependency_count: row.get::<i64, _>("dependency_count") as u32,
        priority: row.get::<i64, _>("priority") as i32,
        wait_factor: row.get("wait_factor"),
        params: serde_json::from_str(&params)?,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        timeout_seconds: row.get::<i64, _>("timeout_seconds") as u64,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        resource_retry_count: row.get::<i64, _>("resource_retry_count") as u32,
        last_rejection_reason: row.get("last_rejection_reason"),
        claimed_by: row.get("claimed_by"),
        queued_at: from_ms(row.get("queued_at_ms"))?,
        available_at: from_ms(row.get("available_at_ms"))?,
    })
}

fn output_from_row(row: &SqliteRow) -> Result<ExecutionOutput> {
    let status: String = row.get("status");

    Ok(ExecutionOutput {
        execution_id: row.get("execution_id"),
        node_id: row.get("node_id"),
        status: NodeStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown node status: {}", status))?,
        result_data: from_json(row.get("result_data"))?,
        started_at: from_ts(row.get("started_at"))?,
        ended_at: from_ts(row.get("ended_at"))?,
        duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|d| d as u64),
        error_message: row.get("error_message"),
        error_details: from_json(row.get("error_details"))?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
    })
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                id, workflow_id, workspace_id, trigger_id, status, trigger_data,
                created_at, started_at, ended_at, results, retry_count, max_retries, is_retry
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(&execution.workspace_id)
        .bind(&execution.trigger_id)
        .bind(execution.status.as_str())
        .bind(serde_json::to_string(&execution.trigger_data)?)
        .bind(execution.created_at.to_rfc3339())
        .bind(to_ts(execution.started_at))
        .bind(to_ts(execution.ended_at))
        .bind(serde_json::to_string(&execution.results)?)
        .bind(execution.retry_count as i64)
        .bind(execution.max_retries as i64)
        .bind(execution.is_retry)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn update_execution(&self, execution: &Execution) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions SET
                status = ?, started_at = ?, ended_at = ?, results = ?,
                retry_count = ?, max_retries = ?, is_retry = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(to_ts(execution.started_at))
        .bind(to_ts(execution.ended_at))
        .bind(serde_json::to_string(&execution.results)?)
        .bind(execution.retry_count as i64)
        .bind(execution.max_retries as i64)
        .bind(execution.is_retry)
        .bind(&execution.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("execution not found: {}", execution.id));
        }
        Ok(())
    }

    async fn mark_execution_running(&self, execution_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE executions SET status = 'RUNNING', started_at = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(at.to_rfc3339())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_inputs(&self, inputs: &[ExecutionInput]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for input in inputs {
            sqlx::query(
                r#"
                INSERT INTO execution_inputs (
                    execution_id, node_id, state, dependency_count, priority, wait_factor,
                    params, max_retries, timeout_seconds, retry_count, resource_retry_count,
                    last_rejection_reason, claimed_by, queued_at_ms, available_at_ms
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&input.execution_id)
            .bind(&input.node_id)
            .bind(input.state.as_str())
            .bind(input.dependency_count as i64)
            .bind(input.priority as i64)
            .bind(input.wait_factor)
            .bind(serde_json::to_string(&input.params)?)
            .bind(input.max_retries as i64)
            .bind(input.timeout_seconds as i64)
            .bind(input.retry_count as i64)
            .bind(input.resource_retry_count as i64)
            .bind(&input.last_rejection_reason)
            .bind(&input.claimed_by)
            .bind(input.queued_at.timestamp_millis())
            .bind(input.available_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_input(&self, execution_id: &str, node_id: &str) -> Result<Option<ExecutionInput>> {
        let row = sqlx::query("SELECT * FROM execution_inputs WHERE execution_id = ? AND node_id = ?")
            .bind(execution_id)
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(input_from_row).transpose()
    }

    async fn get_inputs(&self, execution_id: &str) -> Result<Vec<ExecutionInput>> {
        let rows = sqlx::query("SELECT * FROM execution_inputs WHERE execution_id = ? ORDER BY node_id")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(input_from_row).collect()
    }

    async fn update_input(&self, input: &ExecutionInput) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE execution_inputs SET
                state = ?, dependency_count = ?, priority = ?, wait_factor = ?, params = ?,
                max_retries = ?, timeout_seconds = ?, retry_count = ?, resource_retry_count = ?,
                last_rejection_reason = ?, claimed_by = ?, queued_at_ms = ?, available_at_ms = ?
            WHERE execution_id = ? AND node_id = ?
            "#,
        )
        .bind(input.state.as_str())
        .bind(input.dependency_count as i64)
        .bind(input.priority as i64)
        .bind(input.wait_factor)
        .bind(serde_json::to_string(&input.params)?)
        .bind(input.max_retries as i64)
        .bind(input.timeout_seconds as i64)
        .bind(input.retry_count as i64)
        .bind(input.resource_retry_count as i64)
        .bind(&input.last_rejection_reason)
        .bind(&input.claimed_by)
        .bind(input.queued_at.timestamp_millis())
        .bind(input.available_at.timestamp_millis())
        .bind(&input.execution_id)
        .bind(&input.node_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!(
                "input not found: {}/{}",
                input.execution_id,
                input.node_id
            ));
        }
        Ok(())
    }

    async fn claim_next_input(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionInput>> {
        let row = sqlx::query(
            r#"
            UPDATE execution_inputs
            SET state = 'running', claimed_by = ?1
            WHERE rowid = (
                SELECT rowid FROM execution_inputs
                WHERE state = 'ready'
                  AND dependency_count = 0
                  AND claimed_by IS NULL
                  AND available_at_ms <= ?2
                ORDER BY priority DESC,
                         (?2 - queued_at_ms) * wait_factor DESC,
                         queued_at_ms ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(input_from_row).transpose()
    }

    async fn decrement_dependency(&self, execution_id: &str, node_id: &str) -> Result<Option<u32>> {
        let row = sqlx::query(
            r#"
            UPDATE execution_inputs
            SET dependency_count = MAX(dependency_count - 1, 0),
                state = CASE
                    WHEN dependency_count <= 1 AND state = 'waiting' THEN 'ready'
                    ELSE state
                END
            WHERE execution_id = ? AND node_id = ?
            RETURNING dependency_count
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("dependency_count") as u32))
    }

    async fn finish_unstarted_input(&self, execution_id: &str, node_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE execution_inputs SET state = 'finished'
            WHERE execution_id = ? AND node_id = ?
              AND state IN ('waiting', 'ready')
              AND claimed_by IS NULL
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_inputs(&self, execution_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM execution_inputs WHERE execution_id = ?")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_output(&self, output: &ExecutionOutput) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_outputs (
                execution_id, node_id, status, result_data, started_at, ended_at,
                duration_ms, error_message, error_details, retry_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(execution_id, node_id) DO UPDATE SET
                status = excluded.status,
                result_data = excluded.result_data,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                duration_ms = excluded.duration_ms,
                error_message = excluded.error_message,
                error_details = excluded.error_details,
                retry_count = excluded.retry_count
            "#,
        )
        .bind(&output.execution_id)
        .bind(&output.node_id)
        .bind(output.status.as_str())
        .bind(to_json(output.result_data.as_ref())?)
        .bind(to_ts(output.started_at))
        .bind(to_ts(output.ended_at))
        .bind(output.duration_ms.map(|d| d as i64))
        .bind(&output.error_message)
        .bind(to_json(output.error_details.as_ref())?)
        .bind(output.retry_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_output(&self, execution_id: &str, node_id: &str) -> Result<Option<ExecutionOutput>> {
        let row = sqlx::query("SELECT * FROM execution_outputs WHERE execution_id = ? AND node_id = ?")
            .bind(execution_id)
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(output_from_row).transpose()
    }

    async fn get_outputs(&self, execution_id: &str) -> Result<Vec<ExecutionOutput>> {
        let rows = sqlx::query("SELECT * FROM execution_outputs WHERE execution_id = ? ORDER BY node_id")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(output_from_row).collect()
    }

    async fn delete_outputs(&self, execution_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM execution_outputs WHERE execution_id = ?")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect_memory;
    use crate::execution::types::NodeOutcome;
    use crate::workflow::types::Node;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;

    async fn store() -> SqliteExecutionStore {
        let store = SqliteExecutionStore::new(connect_memory().await.unwrap());
        store.init_schema().await.unwrap();
        store
    }

    fn node(id: &str) -> Node {
        let mut params = Map::new();
        params.insert("text".into(), json!("${node:A.y}"));
        Node {
            id: id.to_string(),
            name: String::new(),
            script_ref: "noop".to_string(),
            input_params: Vec::new(),
            params,
            max_retries: 1,
            timeout_seconds: 5,
            priority: None,
        }
    }

    fn execution(id: &str) -> Execution {
        Execution {
            id: id.to_string(),
            workflow_id: "wf".to_string(),
            workspace_id: "ws".to_string(),
            trigger_id: Some("webhook:/go".to_string()),
            status: ExecutionStatus::Pending,
            trigger_data: json!({"x": "HELLO"}),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            results: BTreeMap::new(),
            retry_count: 0,
            max_retries: 1,
            is_retry: false,
        }
    }

    #[tokio::test]
    async fn execution_lifecycle_persists() {
        let store = store().await;
        let mut exec = execution("e1");
        store.create_execution(&exec).await.unwrap();

        store.mark_execution_running("e1", Utc::now()).await.unwrap();
        let running = store.get_execution("e1").await.unwrap().unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);
        assert!(running.started_at.is_some());

        exec.status = ExecutionStatus::Completed;
        exec.results.insert("A".to_string(), NodeOutcome::cancelled(0));
        store.update_execution(&exec).await.unwrap();

        // Finalized executions are never moved back to RUNNING
        store.mark_execution_running("e1", Utc::now()).await.unwrap();
        let done = store.get_execution("e1").await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.results["A"].status, NodeStatus::Cancelled);
        assert_eq!(done.trigger_data, json!({"x": "HELLO"}));
    }

    #[tokio::test]
    async fn claim_and_decrement_are_row_atomic() {
        let store = store().await;
        let now = Utc::now();
        store
            .create_inputs(&[
                ExecutionInput::for_node("e1", &node("A"), 0, 0, 1.0, now),
                ExecutionInput::for_node("e1", &node("B"), 1, 10, 1.0, now),
            ])
            .await
            .unwrap();

        let first = store.claim_next_input("w1", now).await.unwrap().unwrap();
        assert_eq!(first.node_id, "A");
        assert_eq!(first.claimed_by.as_deref(), Some("w1"));
        assert_eq!(first.params["text"], json!("${node:A.y}"));
        assert!(store.claim_next_input("w2", now).await.unwrap().is_none());

        assert_eq!(store.decrement_dependency("e1", "B").await.unwrap(), Some(0));
        let ready = store.get_input("e1", "B").await.unwrap().unwrap();
        assert_eq!(ready.state, InputState::Ready);

        let second = store.claim_next_input("w2", now).await.unwrap().unwrap();
        assert_eq!(second.node_id, "B");
        assert!(!store.finish_unstarted_input("e1", "B").await.unwrap());
    }

    #[tokio::test]
    async fn outputs_upsert_and_delete() {
        let store = store().await;
        let now = Utc::now();
        let input = ExecutionInput::for_node("e1", &node("A"), 0, 0, 1.0, now);

        let mut output = ExecutionOutput::running(&input, now);
        store.upsert_output(&output).await.unwrap();

        output.result_data = Some(json!({"y": "HELLO_1"}));
        output.finish(NodeStatus::Success, now);
        store.upsert_output(&output).await.unwrap();

        let stored = store.get_output("e1", "A").await.unwrap().unwrap();
        assert_eq!(stored.status, NodeStatus::Success);
        assert_eq!(stored.result_data, Some(json!({"y": "HELLO_1"})));
        assert_eq!(store.get_outputs("e1").await.unwrap().len(), 1);

        store.delete_outputs("e1").await.unwrap();
        assert!(store.get_output("e1", "A").await.unwrap().is_none());
    }
}
