//! # Media Sync Module
//!
//! Keeps a consolidated media catalog in step with remote media servers.
//!
//! ## Overview
//!
//! This module manages the lifecycle of sync jobs, including:
//! - Paging catalog items out of each client through `bridge-traits` adapters
//! - Matching remote items to local entities by external ID, then title and year
//! - Merging and persisting entities with optimistic concurrency
//! - Synchronizing playlists and collections between clients
//! - Recording job runs, schedules and per-client sync configs
//!
//! ## Components
//!
//! - **Job Model** (`job`): Job runs with validated state transitions, frequencies and schedules
//! - **Batch Runner** (`batch`): Chunked processing with cancellation and progress ranges
//! - **Entity Matcher** (`matcher`): Tiered matching of remote items to local entities
//! - **Merge** (`merge`): Field-level merge of remote payloads into local entities
//! - **Media Sync** (`media_sync`): Catalog reconciliation for one client and media kind
//! - **List Sync** (`list_sync`): Playlist and collection sync across client pairs
//! - **Conflict Resolver** (`conflict_resolver`): Sync direction and newest-wins list resolution
//! - **Repository** (`repository`): Database persistence for job runs, configs and schedules
//! - **Sync Coordinator** (`coordinator`): Plans, runs and tracks jobs across users and clients

pub mod batch;
pub mod config;
pub mod conflict_resolver;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod list_sync;
pub mod locks;
pub mod matcher;
pub mod media_sync;
pub mod merge;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod repository;
pub mod users;

pub use batch::{BatchOutcome, BatchRunner, ChunkProcessor, ProgressRange, ProgressSink, SyncStats};
pub use config::SyncConfig;
pub use conflict_resolver::{ConflictResolver, ListVersion, PairPlan, Side, SyncDirection};
pub use coordinator::SyncCoordinator;
pub use error::{Result, SyncError};
pub use job::{Frequency, JobRun, JobRunId, JobSchedule, JobStatus, JobType, SyncJobConfig};
pub use list_sync::{ListSyncEngine, ListSyncStats};
pub use locks::{SyncKey, SyncLockGuard, SyncLocks};
pub use matcher::{EntityMatcher, MatchOutcome, MatchTier};
pub use media_sync::MediaSyncEngine;
pub use merge::{merge, merge_list, MergePayload};
pub use progress::{JobProgress, UnitProgress};
pub use registry::ClientRegistry;
pub use remote::RemoteCallPolicy;
pub use repository::{JobRepository, SqliteJobRepository};
pub use users::{
    ListSyncPreferences, MediaSyncPreferences, StaticUserDirectory, SyncUser, UserDirectory,
    UserSyncPreferences,
};
