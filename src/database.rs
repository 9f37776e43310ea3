/// SQLite connection helpers
///
/// Both persistence layers (workflow definitions and execution working rows)
/// live in separate SQLite files under the configured data directory.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if missing) a pooled connection to a SQLite database file
pub async fn connect_file(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!("Failed to create data directory '{}': {}", parent.display(), e)
        })?;
    }

    tracing::info!("🗄️ Opening database pool: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    Ok(pool)
}

/// Open a private in-memory database
///
/// Every connection to `sqlite::memory:` sees its own database, so the pool is
/// pinned to a single connection.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(pool)
}
