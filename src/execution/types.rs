/// Execution record definitions
///
/// An `Execution` is one run of a workflow. While it is in flight, every node
/// has one `ExecutionInput` (its scheduling record) and, once an attempt has
/// started, one `ExecutionOutput` (its result record). Both are working rows:
/// at finalization they are folded into `Execution.results` and deleted.

use crate::workflow::types::Node;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a whole execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ExecutionStatus::Pending),
            "RUNNING" => Some(ExecutionStatus::Running),
            "COMPLETED" => Some(ExecutionStatus::Completed),
            "FAILED" => Some(ExecutionStatus::Failed),
            "CANCELLED" => Some(ExecutionStatus::Cancelled),
            "TIMEOUT" => Some(ExecutionStatus::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one node's attempt(s) within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "PENDING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Success => "SUCCESS",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Timeout => "TIMEOUT",
            NodeStatus::Skipped => "SKIPPED",
            NodeStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(NodeStatus::Pending),
            "RUNNING" => Some(NodeStatus::Running),
            "SUCCESS" => Some(NodeStatus::Success),
            "FAILED" => Some(NodeStatus::Failed),
            "TIMEOUT" => Some(NodeStatus::Timeout),
            "SKIPPED" => Some(NodeStatus::Skipped),
            "CANCELLED" => Some(NodeStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling state of an ExecutionInput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputState {
    /// Some predecessor has not succeeded yet
    Waiting,
    /// `dependency_count == 0` and not claimed
    Ready,
    /// Claimed by a worker
    Running,
    /// Terminal; the node's fate is in its output (or it was cancelled)
    Finished,
}

impl InputState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputState::Waiting => "waiting",
            InputState::Ready => "ready",
            InputState::Running => "running",
            InputState::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(InputState::Waiting),
            "ready" => Some(InputState::Ready),
            "running" => Some(InputState::Running),
            "finished" => Some(InputState::Finished),
            _ => None,
        }
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub workspace_id: String,
    pub trigger_id: Option<String>,
    pub status: ExecutionStatus,
    pub trigger_data: Value,
    pub created_at: DateTime<Utc>,
    /// Set when the first node starts
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Filled at finalization, one entry per workflow node
    pub results: BTreeMap<String, NodeOutcome>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub is_retry: bool,
}

/// Final fate of one node, as folded into `Execution.results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub status: NodeStatus,
    pub result_data: Option<Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl NodeOutcome {
    /// Outcome for a node that never got to run
    pub fn cancelled(retry_count: u32) -> Self {
        Self {
            status: NodeStatus::Cancelled,
            result_data: None,
            error_message: Some("node never ran".to_string()),
            error_details: None,
            retry_count,
            started_at: None,
            ended_at: None,
            duration_ms: None,
        }
    }
}

impl From<&ExecutionOutput> for NodeOutcome {
    fn from(output: &ExecutionOutput) -> Self {
        Self {
            status: output.status,
            result_data: output.result_data.clone(),
            error_message: output.error_message.clone(),
            error_details: output.error_details.clone(),
            retry_count: output.retry_count,
            started_at: output.started_at,
            ended_at: output.ended_at,
            duration_ms: output.duration_ms,
        }
    }
}

/// Scheduling record for one node within one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInput {
    pub execution_id: String,
    pub node_id: String,
    pub state: InputState,
    /// Predecessors that have not yet succeeded; never increases
    pub dependency_count: u32,
    pub priority: i32,
    /// Scales both retry backoff and the waiting-time tie-break
    pub wait_factor: f64,
    /// Raw configured values, possibly containing reference strings
    pub params: Map<String, Value>,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    /// Script attempts retried so far
    pub retry_count: u32,
    /// Dispatches rejected because params could not be resolved
    pub resource_retry_count: u32,
    pub last_rejection_reason: Option<String>,
    pub claimed_by: Option<String>,
    pub queued_at: DateTime<Utc>,
    /// Not claimable before this instant (retry backoff)
    pub available_at: DateTime<Utc>,
}

impl ExecutionInput {
    pub fn for_node(
        execution_id: &str,
        node: &Node,
        dependency_count: u32,
        priority: i32,
        wait_factor: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            node_id: node.id.clone(),
            state: if dependency_count == 0 {
                InputState::Ready
            } else {
                InputState::Waiting
            },
            dependency_count,
            priority,
            wait_factor,
            params: node.params.clone(),
            max_retries: node.max_retries,
            timeout_seconds: node.timeout_seconds,
            retry_count: 0,
            resource_retry_count: 0,
            last_rejection_reason: None,
            claimed_by: None,
            queued_at: now,
            available_at: now,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == InputState::Ready
            && self.dependency_count == 0
            && self.claimed_by.is_none()
            && self.available_at <= now
    }

    /// Tie-break score: time spent queued, scaled by `wait_factor`
    pub fn wait_score(&self, now: DateTime<Utc>) -> f64 {
        let waited_ms = (now - self.queued_at).num_milliseconds().max(0) as f64;
        waited_ms * self.wait_factor
    }
}

/// Result record for a node's attempt(s)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub execution_id: String,
    pub node_id: String,
    pub status: NodeStatus,
    pub result_data: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub retry_count: u32,
}

impl ExecutionOutput {
    /// Output for an attempt that is starting now
    pub fn running(input: &ExecutionInput, now: DateTime<Utc>) -> Self {
        Self {
            execution_id: input.execution_id.clone(),
            node_id: input.node_id.clone(),
            status: NodeStatus::Running,
            result_data: None,
            started_at: Some(now),
            ended_at: None,
            duration_ms: None,
            error_message: None,
            error_details: None,
            retry_count: input.retry_count,
        }
    }

    /// Output for a node that ends without an attempt (skipped or cancelled)
    pub fn without_attempt(
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            status,
            result_data: None,
            started_at: None,
            ended_at: Some(now),
            duration_ms: None,
            error_message: Some(reason),
            error_details: None,
            retry_count: 0,
        }
    }

    /// Move to a terminal status, stamping end time and duration
    pub fn finish(&mut self, status: NodeStatus, now: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);
    }
}
