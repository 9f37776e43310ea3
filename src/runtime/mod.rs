/// Runtime Execution Core
///
/// This module provides the dependency-count-driven scheduler and its
/// support algorithms:
/// - Type coercion of resolved values
/// - `${type:payload}` reference resolution
/// - petgraph dependency graphs
/// - Worker pool, retry backoff and cron triggers

// Value coercion into declared parameter types
pub mod convert;

// Reference expression parsing and resolution
pub mod resolver;

// Dependency graph builder (petgraph)
pub mod graph;

// Retry delay strategies
pub mod backoff;

// External node executor collaborator
pub mod executor;

// Execution scheduler core
pub mod scheduler;

// Worker tasks claiming inputs
pub mod worker;

// Cron triggers starting executions
pub mod triggers;

pub use backoff::RetryBackoff;
pub use convert::TypeConverter;
pub use executor::{HttpNodeExecutor, NodeExecutor};
pub use graph::DependencyGraph;
pub use resolver::{ReferenceResolver, ResolutionContext, ResourceLookup, StaticResources};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use triggers::CronTriggerService;
pub use worker::WorkerPool;
