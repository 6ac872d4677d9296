//! Core service façade and bootstrap helpers.
//!
//! This crate wires the shared core together for a host process: it opens the
//! SQLite pool described by [`CoreConfig`], builds the repositories, the event
//! bus and the client registry, and hands them to a [`SyncCoordinator`].
//! Hosts register their remote clients on the returned service and either
//! trigger jobs directly or start the background scheduler.
//!
//! ```ignore
//! use core_service::{CoreService, ServiceConfig};
//! use core_runtime::config::CoreConfig;
//!
//! let config = ServiceConfig::new(
//!     CoreConfig::builder().database_path("/var/lib/media-sync/media.db").build()?,
//! );
//! let core = CoreService::bootstrap(config, users).await?;
//! core.register_client(user_id, plex_handle).await;
//! let scheduler = core.start_scheduler(Duration::from_secs(60))?;
//! ```

pub mod error;
pub mod scheduler;

pub use error::{CoreError, Result};
pub use scheduler::SchedulerHandle;

use bridge_traits::{ClientHandle, Clock, SystemClock};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{SqliteMediaRepository, UserId};
use core_runtime::config::{CoreConfig, DatabaseLocation};
use core_runtime::events::{EventBus, EventStream};
use core_runtime::logging::init_logging;
use core_sync::{
    ClientRegistry, JobRepository, SqliteJobRepository, SyncConfig, SyncCoordinator,
    UserDirectory,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Host configuration plus engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub core: CoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl ServiceConfig {
    pub fn new(core: CoreConfig) -> Self {
        Self {
            core,
            sync: SyncConfig::default(),
        }
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ServiceConfig = serde_json::from_str(json)
            .map_err(|e| CoreError::InitializationFailed(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.core.validate()?;
        self.sync.validate()?;
        Ok(())
    }

    fn database(&self) -> DatabaseConfig {
        match &self.core.database {
            DatabaseLocation::File(path) => {
                DatabaseConfig::new(path.clone()).max_connections(self.core.max_db_connections)
            }
            DatabaseLocation::InMemory => DatabaseConfig::in_memory(),
        }
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: ServiceConfig,
    pool: SqlitePool,
    event_bus: Arc<EventBus>,
    registry: Arc<ClientRegistry>,
    jobs: Arc<dyn JobRepository>,
    coordinator: Arc<SyncCoordinator>,
}

impl CoreService {
    /// Bootstrap the core against the system clock.
    pub async fn bootstrap(config: ServiceConfig, users: Arc<dyn UserDirectory>) -> Result<Self> {
        Self::bootstrap_with_clock(config, users, Arc::new(SystemClock)).await
    }

    /// Bootstrap the core against `clock`.
    ///
    /// Installs the configured tracing subscriber unless the host already set
    /// a global one.
    pub async fn bootstrap_with_clock(
        config: ServiceConfig,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if let Err(e) = init_logging(config.core.logging.clone()) {
            debug!(error = %e, "Keeping the existing tracing subscriber");
        }

        let pool = create_pool(config.database()).await?;
        let event_bus = Arc::new(EventBus::new(config.core.event_buffer_size));
        let registry = Arc::new(ClientRegistry::new());
        let jobs: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool.clone()));
        let features = config.core.features;

        let coordinator = SyncCoordinator::new(
            config.sync.clone(),
            registry.clone(),
            users,
            jobs.clone(),
            Arc::new(SqliteMediaRepository::new(pool.clone())),
            event_bus.clone(),
            clock,
        )?
        .with_enabled_jobs(features.enable_media_sync, features.enable_list_sync);

        info!(
            media_sync = features.enable_media_sync,
            list_sync = features.enable_list_sync,
            scheduler = features.enable_scheduler,
            "Core service initialized"
        );

        Ok(Self {
            config,
            pool,
            event_bus,
            registry,
            jobs,
            coordinator: Arc::new(coordinator),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn jobs(&self) -> Arc<dyn JobRepository> {
        Arc::clone(&self.jobs)
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Subscribe to sync and library events.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub async fn register_client(&self, user_id: UserId, handle: ClientHandle) {
        self.registry.register(user_id, handle).await;
    }

    /// Spawn the loop that runs due schedules every `tick`.
    ///
    /// # Errors
    ///
    /// - `FeatureDisabled` if the scheduler is switched off
    /// - `Runtime` if `tick` is zero
    pub fn start_scheduler(&self, tick: Duration) -> Result<SchedulerHandle> {
        if !self.config.core.features.enable_scheduler {
            return Err(CoreError::FeatureDisabled("scheduler".to_string()));
        }
        if tick.is_zero() {
            return Err(core_runtime::Error::Config(
                "scheduler tick must be greater than 0".to_string(),
            )
            .into());
        }
        Ok(scheduler::spawn(self.coordinator(), tick))
    }

    /// Close the database pool once running jobs have returned.
    pub async fn shutdown(self) {
        self.pool.close().await;
        info!("Core service shut down");
    }
}
