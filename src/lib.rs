/// flowcore: workflow DAG execution engine
///
/// This library provides the dependency-count-driven execution scheduler,
/// the `${type:payload}` reference resolver and the parameter type
/// converter, together with the storage, worker and HTTP layers around them.

// Core configuration and setup
pub mod config;

// Typed error taxonomy
pub mod errors;

// SQLite connection helpers
pub mod database;

// Workflow management layer - definitions, storage, and registry
pub mod workflow;

// Execution records and their stores
pub mod execution;

// Runtime execution core - scheduler, resolver, converter, workers
pub mod runtime;

// HTTP API layer - execution endpoints and webhook triggers
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use errors::{SchedulerError, ResolveError, ConversionError, NodeError};
pub use execution::{Execution, ExecutionStatus, NodeStatus};
pub use runtime::{Scheduler, SchedulerConfig, WorkerPool};
pub use workflow::{Edge, Node, Workflow};
pub use server::start_server;
