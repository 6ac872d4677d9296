//! # Core Configuration Module
//!
//! Host-level configuration for the sync engine.
//!
//! ## Overview
//!
//! `CoreConfig` is constructed through [`CoreConfigBuilder`] and validated
//! fail-fast on `build()`. It can also be loaded from JSON, in which case the
//! same validation runs.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/media-sync/media.db")
//!     .max_db_connections(8)
//!     .enable_list_sync(false)
//!     .build()?;
//! ```
//!
//! Engine tuning (batch sizes, concurrency, timeouts) lives in
//! `core_sync::SyncConfig`.

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MAX_DB_CONNECTIONS: u32 = 64;
const MAX_EVENT_BUFFER_SIZE: usize = 100_000;

/// Where the local store lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum DatabaseLocation {
    File(PathBuf),
    InMemory,
}

/// Feature flags gating the job families the host runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Reconcile catalog media (movies, series, music)
    pub enable_media_sync: bool,

    /// Propagate playlists and collections between clients
    pub enable_list_sync: bool,

    /// Run scheduled jobs from `job_schedules`
    pub enable_scheduler: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_media_sync: true,
            enable_list_sync: true,
            enable_scheduler: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub database: DatabaseLocation,

    /// Maximum number of pooled database connections
    pub max_db_connections: u32,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub features: FeatureFlags,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if let DatabaseLocation::File(path) = &self.database {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        if self.max_db_connections == 0 || self.max_db_connections > MAX_DB_CONNECTIONS {
            return Err(Error::Config(format!(
                "max_db_connections must be between 1 and {}",
                MAX_DB_CONNECTIONS
            )));
        }

        if self.event_buffer_size == 0 || self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "event_buffer_size must be between 1 and {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        self.logging.validate()?;

        if self.features.enable_scheduler
            && !self.features.enable_media_sync
            && !self.features.enable_list_sync
        {
            return Err(Error::Config(
                "Scheduler enabled but no job family is enabled. \
                 Enable media or list sync, or disable the scheduler."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    database: Option<DatabaseLocation>,
    max_db_connections: Option<u32>,
    event_buffer_size: Option<usize>,
    logging: Option<LoggingConfig>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Store the database in a file at `path`.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database = Some(DatabaseLocation::File(path.into()));
        self
    }

    /// Keep the database in memory; contents are lost on shutdown.
    pub fn in_memory_database(mut self) -> Self {
        self.database = Some(DatabaseLocation::InMemory);
        self
    }

    pub fn max_db_connections(mut self, connections: u32) -> Self {
        self.max_db_connections = Some(connections);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn enable_media_sync(mut self, enabled: bool) -> Self {
        self.features.enable_media_sync = enabled;
        self
    }

    pub fn enable_list_sync(mut self, enabled: bool) -> Self {
        self.features.enable_list_sync = enabled;
        self
    }

    pub fn enable_scheduler(mut self, enabled: bool) -> Self {
        self.features.enable_scheduler = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let database = self.database.ok_or_else(|| {
            Error::Config(
                "Database location is required. Use .database_path() or .in_memory_database()."
                    .to_string(),
            )
        })?;

        let config = CoreConfig {
            database,
            max_db_connections: self.max_db_connections.unwrap_or(5),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            logging: self.logging.unwrap_or_default(),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
