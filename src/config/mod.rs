/// Configuration management for the flowcore engine
///
/// Handles server configuration, database location, scheduler tunables and
/// the external executor endpoint. Defaults come from `FLOWCORE_*`
/// environment variables.

use crate::runtime::{backoff::RetryBackoff, scheduler::SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Worker pool and retry policy
    pub scheduler: SchedulerSettings,
    /// External script sandbox
    pub executor: ExecutorConfig,
    /// tracing filter level (e.g. "info", "debug")
    pub log_level: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding workflows.db and executions.db (default: "data")
    pub data_dir: String,
}

impl DatabaseConfig {
    pub fn workflows_db(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("workflows.db")
    }

    pub fn executions_db(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("executions.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub backoff: RetryBackoff,
    pub default_wait_factor: f64,
    pub retry_resolution_failures: bool,
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            backoff: self.backoff,
            default_wait_factor: self.default_wait_factor,
            retry_resolution_failures: self.retry_resolution_failures,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL; the executor POSTs to `{endpoint}/run`
    pub endpoint: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let retry_delay_ms = env_or("FLOWCORE_RETRY_DELAY_MS", 1_000u64);
        let backoff = std::env::var("FLOWCORE_RETRY_BACKOFF")
            .ok()
            .and_then(|name| RetryBackoff::from_name(&name, retry_delay_ms))
            .unwrap_or_else(|| {
                RetryBackoff::from_name("exponential", retry_delay_ms).unwrap_or_default()
            });

        Self {
            server: ServerConfig {
                host: std::env::var("FLOWCORE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("FLOWCORE_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("FLOWCORE_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            scheduler: SchedulerSettings {
                worker_count: env_or("FLOWCORE_WORKERS", 4),
                poll_interval_ms: env_or("FLOWCORE_POLL_INTERVAL_MS", 200),
                backoff,
                default_wait_factor: 1.0,
                retry_resolution_failures: env_or("FLOWCORE_RETRY_RESOLUTION_FAILURES", false),
            },
            executor: ExecutorConfig {
                endpoint: std::env::var("FLOWCORE_EXECUTOR_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            },
            log_level: std::env::var("FLOWCORE_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
