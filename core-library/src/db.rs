//! # Database Connection Pool Module
//!
//! Provides the SQLite connection pool backing the local media store and the
//! job bookkeeping tables.
//!
//! ## Features
//!
//! - **WAL Mode**: Enabled for file databases (multiple readers, one writer)
//! - **Foreign Keys**: Enforced so mapping rows follow their media entity
//! - **Automatic Migrations**: Embedded with `sqlx::migrate!` and run on creation
//! - **Health Checks**: Connection validation after startup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::db::{DatabaseConfig, create_pool};
//!
//! let config = DatabaseConfig::new("media.db").max_connections(8);
//! let pool = create_pool(config).await?;
//! ```
//!
//! Tests use [`create_test_pool`], an in-memory database restricted to one
//! connection so every query sees the same schema and rows.

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Database configuration for SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (`sqlite:<path>` or `sqlite::memory:`)
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,

    /// Enable statement caching (number of statements to cache)
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    /// Create a new database configuration with the given file path
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        let database_url = format!("sqlite:{}", path.display());

        Self {
            database_url,
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            idle_timeout: Some(Duration::from_secs(600)),  // 10 minutes
            statement_cache_capacity: 100,
        }
    }

    /// Create a configuration for an in-memory database
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single long-lived connection.
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
            statement_cache_capacity: 100,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }

    /// Set the minimum number of connections
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the statement cache capacity
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool
///
/// Configures connection options, opens the pool, applies the embedded
/// migrations and runs a health check.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, a migration fails or
/// the health check query fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let mut connect_options =
        SqliteConnectOptions::from_str(&config.database_url).map_err(LibraryError::Database)?;

    connect_options = connect_options
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .statement_cache_capacity(config.statement_cache_capacity);

    if !config.is_in_memory() {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    debug!("SQLite connection options configured");

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            LibraryError::Database(e)
        })?;

    info!(
        connections = pool.size(),
        "Database connection pool created successfully"
    );

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    Ok(pool)
}

/// Create an in-memory pool with migrations applied
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LibraryError::Migration(e.to_string())
        })?;

    info!("Database migrations completed successfully");
    Ok(())
}

/// Execute a trivial query to verify the pool is usable
pub async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Performing database health check");

    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        LibraryError::Database(e)
    })?;

    debug!("Database health check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_pool() {
        let pool = create_test_pool().await;
        assert!(pool.is_ok(), "Should create test pool successfully");
    }

    #[tokio::test]
    async fn test_health_check() {
        let pool = create_test_pool().await.unwrap();
        assert!(health_check(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_builder() {
        let config = DatabaseConfig::new("media.db")
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(60))
            .statement_cache_capacity(200);

        assert_eq!(config.database_url, "sqlite:media.db");
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.statement_cache_capacity, 200);
        assert!(!config.is_in_memory());
        assert!(DatabaseConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in [
            "media_items",
            "media_sync_clients",
            "media_external_ids",
            "job_runs",
            "sync_job_configs",
            "job_schedules",
        ] {
            let result: (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();

            assert_eq!(result.0, 1, "{} table should exist", table);
        }
    }
}
