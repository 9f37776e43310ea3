/// Execution Records and Persistence
///
/// - Execution / ExecutionInput / ExecutionOutput records
/// - The `ExecutionStore` trait the scheduler drives
/// - In-memory and SQLite store implementations

// Record types and status enums
pub mod types;

// Store trait and in-memory implementation
pub mod store;

// sqlx-backed store
pub mod sqlite;

pub use sqlite::SqliteExecutionStore;
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use types::{
    Execution, ExecutionInput, ExecutionOutput, ExecutionStatus, InputState, NodeOutcome,
    NodeStatus,
};
