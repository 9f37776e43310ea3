/// Core workflow type definitions
///
/// Defines the workflow graph consumed by the scheduler: nodes, edges, the
/// declared parameter schema of each node, and cron triggers. These types are
/// serialized/deserialized from JSON for persistence by the editing layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON in SQLite and compiled into dependency graphs
/// before any execution starts. The graph is expected to be acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-grading")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Owning workspace, copied onto every execution
    #[serde(default = "default_workspace")]
    pub workspace_id: String,
    /// Default dispatch priority for every node (higher runs first)
    #[serde(default)]
    pub priority: i32,
    /// How many times a failed execution of this workflow may be re-run
    #[serde(default)]
    pub max_retries: u32,
    /// Optional wall-clock limit for a whole execution
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// List of nodes in this workflow
    pub nodes: Vec<Node>,
    /// List of edges connecting nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Scheduled entry points
    #[serde(default)]
    pub triggers: Vec<CronTrigger>,
}

fn default_workspace() -> String {
    "default".to_string()
}

/// A single executable step in the workflow DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "A", "fetch-user")
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Opaque reference to the script the executor should run
    pub script_ref: String,
    /// Declared parameter schema
    #[serde(default)]
    pub input_params: Vec<InputParamDef>,
    /// Configured parameter values, possibly containing `${type:payload}` references
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Overrides the workflow priority for this node
    #[serde(default)]
    pub priority: Option<i32>,
}

fn default_timeout() -> u64 {
    60
}

/// Declaration of one input parameter of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParamDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Used when the node has no configured value for this parameter
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

/// Declared type of a node parameter; drives the type converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection between two nodes in the workflow DAG
///
/// `to_node_id` depends on `from_node_id`: it becomes eligible only after
/// `from_node_id` succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(alias = "from")]
    pub from_node_id: String,
    #[serde(alias = "to")]
    pub to_node_id: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_node_id: from.into(),
            to_node_id: to.into(),
        }
    }
}

/// Background cron trigger for scheduled executions
///
/// Expected shape: { "id": "nightly", "schedule": "0 0 2 * * *", "payload": {...} }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronTrigger {
    pub id: String,
    pub schedule: String,
    #[serde(default)]
    pub payload: Value,
}
