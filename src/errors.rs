/// Error taxonomy for the execution core
///
/// Node-level errors (resolution, conversion, execution, timeout) never escape
/// the scheduler: they are folded into ExecutionOutput records. Only
/// `SchedulerError` reaches callers of the public operations.

use serde_json::Value;
use thiserror::Error;

/// A resolved value did not have the shape of the declared parameter type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert field '{field}' to {expected_type}: got {actual_value}")]
pub struct ConversionError {
    pub field: String,
    pub expected_type: String,
    pub actual_value: String,
}

impl ConversionError {
    pub fn new(field: &str, expected_type: &str, actual_value: &Value) -> Self {
        Self {
            field: field.to_string(),
            expected_type: expected_type.to_string(),
            actual_value: actual_value.to_string(),
        }
    }
}

/// Failures while turning a node's configured params into concrete values
///
/// These are input errors: they abort the current dispatch attempt and are
/// recorded as the input's rejection reason.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    /// Malformed `${type:payload}` expression
    #[error("invalid reference '{raw}' in field '{field}': {reason}")]
    Parse {
        raw: String,
        field: String,
        reason: String,
    },

    /// A path segment, index, or node id was not present in the context
    #[error("cannot resolve '{path}': missing segment '{missing_segment}'")]
    Resolution {
        path: String,
        missing_segment: String,
    },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("required parameter '{field}' has no value")]
    MissingParameter { field: String },

    /// An external store (variables, credentials, ...) could not serve the lookup
    #[error("{kind} lookup for '{id}' failed: {reason}")]
    Lookup {
        kind: String,
        id: String,
        reason: String,
    },
}

/// Errors raised by (or on behalf of) the external node executor
///
/// `Execution` and `Timeout` are subject to the node retry policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("node execution failed: {message}")]
    Execution {
        message: String,
        details: Option<Value>,
    },

    #[error("node timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("node execution cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn execution(message: impl Into<String>) -> Self {
        NodeError::Execution {
            message: message.into(),
            details: None,
        }
    }
}

/// Structural problems found while building a dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("workflow contains a cycle through node: {0}")]
    Cycle(String),
}

/// Errors surfaced to callers of the scheduler's public operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("invalid workflow graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("execution {execution_id} cannot be retried: {reason}")]
    NotRetryable {
        execution_id: String,
        reason: String,
    },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
