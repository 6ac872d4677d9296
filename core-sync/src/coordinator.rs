//! # Sync Coordinator
//!
//! Runs sync jobs across every active user and their registered clients.
//!
//! ## Overview
//!
//! The `SyncCoordinator` owns the job lifecycle:
//! - Records a `JobRun` and moves it `Pending → Running → {Completed, Failed}`
//! - Plans sync units: one per (user, client, media kind) for catalog media,
//!   one per (user, list kind) for playlists and collections
//! - Runs units concurrently, bounded by `max_concurrent_clients`, each under
//!   an execution lock
//! - Aggregates unit progress into job progress and broadcasts lifecycle
//!   events on the `EventBus`
//!
//! ## Workflow
//!
//! ### Scheduled jobs
//! 1. Enumerate active users
//! 2. Skip users that have the feature switched off
//! 3. Enumerate the user's capability-matching clients
//! 4. Create missing `SyncJobConfig` records; skip disabled or not-due ones
//! 5. Run the units; stamp `last_sync_time` on each config that succeeded
//!
//! ### Manual runs
//! `sync_client_now` targets one (user, client, kind) and ignores frequency
//! and the per-config enabled flag.
//!
//! ## Failures
//!
//! A failing unit is logged and counted; other units keep running. Only
//! persistence and configuration errors fail the job. A cancelled or timed
//! out job ends `Failed` with a message saying so.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncCoordinator};
//!
//! let coordinator = SyncCoordinator::new(
//!     SyncConfig::default(),
//!     registry,
//!     users,
//!     jobs,
//!     media_repository,
//!     event_bus,
//!     clock,
//! )?;
//!
//! let run = coordinator.run_media_sync_job().await?;
//! println!("{}: {}", run.status, run.message.unwrap_or_default());
//! ```

use crate::config::SyncConfig;
use crate::job::{Frequency, JobRun, JobRunId, JobSchedule, JobStatus, JobType, SyncJobConfig};
use crate::list_sync::{ListSyncEngine, ListSyncStats};
use crate::locks::{SyncKey, SyncLocks};
use crate::media_sync::MediaSyncEngine;
use crate::batch::SyncStats;
use crate::progress::JobProgress;
use crate::registry::ClientRegistry;
use crate::repository::JobRepository;
use crate::users::{ListSyncPreferences, SyncUser, UserDirectory};
use crate::{Result, SyncError};
use bridge_traits::{Capability, ClientHandle, Clock};
use core_library::{ClientId, MediaKind, MediaRepository, MediaStore, UserId};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Units
// ============================================================================

enum JobRequest {
    Scheduled {
        job_type: JobType,
        job_name: String,
    },
    Manual {
        user_id: UserId,
        client_id: ClientId,
        kind: MediaKind,
    },
}

impl JobRequest {
    fn job_type(&self) -> JobType {
        match self {
            JobRequest::Scheduled { job_type, .. } => *job_type,
            JobRequest::Manual { kind, .. } => JobType::for_kind(*kind),
        }
    }

    fn job_name(&self) -> String {
        match self {
            JobRequest::Scheduled { job_name, .. } => job_name.clone(),
            JobRequest::Manual { kind, .. } => JobType::for_kind(*kind).default_job_name().to_string(),
        }
    }

    fn user_id(&self) -> Option<UserId> {
        match self {
            JobRequest::Scheduled { .. } => None,
            JobRequest::Manual { user_id, .. } => Some(*user_id),
        }
    }
}

enum UnitTarget {
    Media {
        client: ClientHandle,
        /// Every client of the user, for title/year matching
        scope: Vec<ClientId>,
    },
    Lists {
        clients: Vec<ClientHandle>,
        preferences: ListSyncPreferences,
        focus: Option<ClientId>,
    },
}

struct SyncUnit {
    user_id: UserId,
    kind: MediaKind,
    target: UnitTarget,
    /// Configs stamped with `last_sync_time` when the unit succeeds
    configs: Vec<SyncJobConfig>,
}

impl SyncUnit {
    fn keys(&self) -> Vec<SyncKey> {
        match &self.target {
            UnitTarget::Media { client, .. } => {
                vec![SyncKey::new(self.user_id, client.id(), self.kind)]
            }
            UnitTarget::Lists { clients, .. } => clients
                .iter()
                .map(|c| SyncKey::new(self.user_id, c.id(), self.kind))
                .collect(),
        }
    }

    fn client_id(&self) -> Option<ClientId> {
        match &self.target {
            UnitTarget::Media { client, .. } => Some(client.id()),
            UnitTarget::Lists { focus, .. } => *focus,
        }
    }

    fn label(&self) -> String {
        match &self.target {
            UnitTarget::Media { client, .. } => format!("{} {}", client.name(), self.kind),
            UnitTarget::Lists { .. } => format!("user {} {}", self.user_id, self.kind),
        }
    }
}

enum UnitReport {
    Media(SyncStats),
    Lists(ListSyncStats),
}

impl UnitReport {
    fn created(&self) -> u64 {
        match self {
            UnitReport::Media(stats) => stats.created,
            UnitReport::Lists(stats) => stats.lists_created,
        }
    }

    fn updated(&self) -> u64 {
        match self {
            UnitReport::Media(stats) => stats.updated,
            UnitReport::Lists(stats) => stats.items_added,
        }
    }

    fn failed(&self) -> u64 {
        match self {
            UnitReport::Media(stats) => stats.failed,
            UnitReport::Lists(stats) => stats.failed(),
        }
    }
}

#[derive(Default)]
struct UnitPlan {
    units: Vec<SyncUnit>,
    skipped: usize,
}

/// Totals across the units of one job run
#[derive(Debug, Default)]
struct JobSummary {
    units: usize,
    skipped: usize,
    failed_units: usize,
    created: u64,
    updated: u64,
    failed_items: u64,
    last_error: Option<String>,
}

impl JobSummary {
    fn message(&self) -> String {
        let mut message = format!(
            "Synced {} units ({} skipped, {} failed): {} created, {} updated, {} items failed",
            self.units,
            self.skipped,
            self.failed_units,
            self.created,
            self.updated,
            self.failed_items
        );
        if let Some(last) = &self.last_error {
            message.push_str("; last error: ");
            message.push_str(last);
        }
        message
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct SyncCoordinator {
    config: SyncConfig,
    registry: Arc<ClientRegistry>,
    users: Arc<dyn UserDirectory>,
    jobs: Arc<dyn JobRepository>,
    media: MediaSyncEngine,
    lists: ListSyncEngine,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    locks: SyncLocks,
    /// Cancellation tokens of running jobs
    active_jobs: Arc<Mutex<HashMap<JobRunId, CancellationToken>>>,
    media_jobs_enabled: bool,
    list_jobs_enabled: bool,
}

impl SyncCoordinator {
    /// Create a new sync coordinator
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `config` is invalid
    pub fn new(
        config: SyncConfig,
        registry: Arc<ClientRegistry>,
        users: Arc<dyn UserDirectory>,
        jobs: Arc<dyn JobRepository>,
        media_repository: Arc<dyn MediaRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let store = MediaStore::new(media_repository);

        Ok(Self {
            media: MediaSyncEngine::new(store.clone(), &config, event_bus.clone())?,
            lists: ListSyncEngine::new(store, &config, clock.clone(), event_bus.clone()),
            config,
            registry,
            users,
            jobs,
            event_bus,
            clock,
            locks: SyncLocks::new(),
            active_jobs: Arc::new(Mutex::new(HashMap::new())),
            media_jobs_enabled: true,
            list_jobs_enabled: true,
        })
    }

    /// Switch job families on or off
    pub fn with_enabled_jobs(mut self, media: bool, lists: bool) -> Self {
        self.media_jobs_enabled = media;
        self.list_jobs_enabled = lists;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn is_enabled(&self, job_type: JobType) -> bool {
        match job_type {
            JobType::MediaSync => self.media_jobs_enabled,
            JobType::ListSync => self.list_jobs_enabled,
        }
    }

    /// Run the catalog sync job for every active user
    pub async fn run_media_sync_job(&self) -> Result<JobRun> {
        self.execute(JobRequest::Scheduled {
            job_type: JobType::MediaSync,
            job_name: JobType::MediaSync.default_job_name().to_string(),
        })
        .await
    }

    /// Run the playlist and collection sync job for every active user
    pub async fn run_list_sync_job(&self) -> Result<JobRun> {
        self.execute(JobRequest::Scheduled {
            job_type: JobType::ListSync,
            job_name: JobType::ListSync.default_job_name().to_string(),
        })
        .await
    }

    /// Sync one media kind of one client right away.
    ///
    /// For list kinds, only client pairs involving `client_id` run.
    #[instrument(skip_all, fields(user_id = %user_id, client_id = %client_id, kind = %kind))]
    pub async fn sync_client_now(
        &self,
        user_id: UserId,
        client_id: ClientId,
        kind: MediaKind,
    ) -> Result<JobRun> {
        self.execute(JobRequest::Manual {
            user_id,
            client_id,
            kind,
        })
        .await
    }

    /// Run every enabled schedule that is due. Missing default schedules are
    /// created as daily.
    pub async fn run_due_jobs(&self) -> Result<Vec<JobRun>> {
        for job_type in [JobType::MediaSync, JobType::ListSync] {
            if self.jobs.get_schedule(job_type.default_job_name()).await?.is_none() {
                self.jobs
                    .upsert_schedule(&JobSchedule::new(job_type, Frequency::Daily))
                    .await?;
            }
        }

        let now = self.clock.now();
        let mut runs = Vec::new();
        for schedule in self.jobs.list_schedules().await? {
            if !self.is_enabled(schedule.job_type) || !schedule.is_due(now) {
                debug!(job = %schedule.job_name, "Schedule not due");
                continue;
            }

            let run = self
                .execute(JobRequest::Scheduled {
                    job_type: schedule.job_type,
                    job_name: schedule.job_name.clone(),
                })
                .await?;

            let mut updated = schedule;
            updated.last_run_time = Some(now);
            self.jobs.upsert_schedule(&updated).await?;
            runs.push(run);
        }
        Ok(runs)
    }

    /// Request cancellation of a running job
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if the job is not running
    pub async fn cancel_job(&self, job_id: &JobRunId) -> Result<()> {
        let active = self.active_jobs.lock().await;
        let token = active.get(job_id).ok_or_else(|| SyncError::JobNotFound {
            job_id: job_id.as_str(),
        })?;
        token.cancel();
        info!(job_id = %job_id, "Cancellation requested");
        Ok(())
    }

    /// IDs of jobs currently running
    pub async fn active_jobs(&self) -> Vec<JobRunId> {
        self.active_jobs.lock().await.keys().copied().collect()
    }

    pub async fn get_job_run(&self, job_id: &JobRunId) -> Result<Option<JobRun>> {
        self.jobs.find_job_run(job_id).await
    }

    pub async fn recent_job_runs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>> {
        self.jobs.recent_job_runs(job_name, limit).await
    }

    // ========================================================================
    // Job lifecycle
    // ========================================================================

    async fn execute(&self, request: JobRequest) -> Result<JobRun> {
        let job_type = request.job_type();
        if !self.is_enabled(job_type) {
            return Err(SyncError::Configuration(format!("{} jobs are disabled", job_type)));
        }

        let now = self.clock.now();
        let run = JobRun::new(request.job_name(), job_type, request.user_id(), now);
        self.jobs.create_job_run(&run).await?;
        let run = run.start(now)?;
        self.jobs.start_job_run(&run.id, now).await?;

        info!(job_id = %run.id, job = %run.job_name, "Job started");
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                job_id: run.id.as_str(),
                job_name: run.job_name.clone(),
                user_id: run.user_id.map(|u| u.0),
            }))
            .ok();

        let cancel = CancellationToken::new();
        self.active_jobs.lock().await.insert(run.id, cancel.clone());

        let outcome = match self.config.job_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, self.run_units(&run, &request, &cancel)).await {
                    Ok(outcome) => outcome.map_err(JobFailure::from),
                    Err(_) => {
                        cancel.cancel();
                        Err(JobFailure::TimedOut(limit))
                    }
                }
            }
            None => self
                .run_units(&run, &request, &cancel)
                .await
                .map_err(JobFailure::from),
        };
        let outcome = outcome.and_then(|summary| {
            if summary.last_error.is_some() {
                Err(JobFailure::Units(summary))
            } else {
                Ok(summary)
            }
        });

        self.active_jobs.lock().await.remove(&run.id);
        self.finish(run, outcome).await
    }

    async fn finish(
        &self,
        run: JobRun,
        outcome: std::result::Result<JobSummary, JobFailure>,
    ) -> Result<JobRun> {
        let now = self.clock.now();
        let job_id = run.id;

        let finished = match outcome {
            Ok(summary) => {
                let message = summary.message();
                let finished = run.complete(message.clone(), now)?;
                self.jobs
                    .complete_job_run(&job_id, JobStatus::Completed, &message, now)
                    .await?;
                info!(job_id = %job_id, message = %message, "Job completed");
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::Completed {
                        job_id: job_id.as_str(),
                        message,
                        duration_secs: finished.duration_secs().unwrap_or(0),
                    }))
                    .ok();
                finished
            }
            Err(failure) => {
                let message = failure.message();
                let finished = run.fail(message.clone(), now)?;
                self.jobs
                    .complete_job_run(&job_id, JobStatus::Failed, &message, now)
                    .await?;
                error!(job_id = %job_id, message = %message, "Job failed");
                let event = match failure {
                    JobFailure::Cancelled => SyncEvent::Cancelled {
                        job_id: job_id.as_str(),
                    },
                    _ => SyncEvent::Failed {
                        job_id: job_id.as_str(),
                        message,
                    },
                };
                self.event_bus.emit(CoreEvent::Sync(event)).ok();
                finished
            }
        };

        Ok(self.jobs.find_job_run(&job_id).await?.unwrap_or(finished))
    }

    async fn run_units(
        &self,
        run: &JobRun,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobSummary> {
        let plan = self.plan_units(request).await?;
        let mut summary = JobSummary {
            units: plan.units.len(),
            skipped: plan.skipped,
            ..JobSummary::default()
        };

        let progress = JobProgress::new(
            run.id,
            self.jobs.clone(),
            self.event_bus.clone(),
            plan.units.len().max(1),
        );
        if plan.units.is_empty() {
            info!(job_id = %run.id, "Nothing to sync");
            progress.finish_unit(0).await?;
            return Ok(summary);
        }

        let mut results = stream::iter(plan.units.into_iter().enumerate())
            .map(|(index, unit)| {
                let progress = progress.clone();
                async move {
                    let result = self.run_unit(run, index, &unit, &progress, cancel).await;
                    (unit, result)
                }
            })
            .buffer_unordered(self.config.max_concurrent_clients);

        while let Some((unit, result)) = results.next().await {
            match result {
                Ok(report) => {
                    summary.created += report.created();
                    summary.updated += report.updated();
                    summary.failed_items += report.failed();
                }
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(SyncError::UnsupportedCapability { .. }) => {
                    debug!(unit = %unit.label(), "Client lacks capability, skipped");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(job_id = %run.id, unit = %unit.label(), error = %e, "Sync unit failed");
                    summary.failed_units += 1;
                    summary.last_error = Some(format!("{}: {}", unit.label(), e));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(summary)
    }

    #[instrument(skip_all, fields(job_id = %run.id, unit = %unit.label()))]
    async fn run_unit(
        &self,
        run: &JobRun,
        index: usize,
        unit: &SyncUnit,
        progress: &Arc<JobProgress>,
        cancel: &CancellationToken,
    ) -> Result<UnitReport> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let _lock = self.locks.try_acquire_all(&unit.keys())?;
        let sink = progress.unit(index, unit.label());

        let result = match &unit.target {
            UnitTarget::Media { client, scope } => self
                .media
                .sync_media_kind(unit.kind, client, scope, &sink, cancel)
                .await
                .map(UnitReport::Media),
            UnitTarget::Lists {
                clients,
                preferences,
                focus,
            } => self
                .lists
                .sync_list_kind(
                    unit.kind,
                    clients,
                    preferences,
                    unit.user_id,
                    *focus,
                    &sink,
                    cancel,
                )
                .await
                .map(UnitReport::Lists),
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                if e.is_recoverable() {
                    sink.finish().await?;
                }
                return Err(e);
            }
        };
        sink.finish().await?;

        let now = self.clock.now();
        for config in &unit.configs {
            let mut updated = config.clone();
            updated.last_sync_time = Some(now);
            self.jobs.update_sync_job_config(&updated).await?;
        }

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::UnitFinished {
                job_id: run.id.as_str(),
                user_id: unit.user_id.0,
                client_id: unit.client_id().map(|c| c.0),
                media_kind: unit.kind.to_string(),
                created: report.created(),
                updated: report.updated(),
                failed: report.failed(),
            }))
            .ok();

        Ok(report)
    }

    // ========================================================================
    // Planning
    // ========================================================================

    async fn plan_units(&self, request: &JobRequest) -> Result<UnitPlan> {
        match request {
            JobRequest::Scheduled { job_type, .. } => {
                let mut plan = UnitPlan::default();
                for user in self.users.active_users().await? {
                    match self.plan_user(&user, *job_type).await {
                        Ok(user_plan) => {
                            plan.units.extend(user_plan.units);
                            plan.skipped += user_plan.skipped;
                        }
                        Err(e) if !e.is_recoverable() => return Err(e),
                        Err(e) => warn!(user_id = %user.id, error = %e, "Skipping user"),
                    }
                }
                Ok(plan)
            }
            JobRequest::Manual {
                user_id,
                client_id,
                kind,
            } => self.plan_manual(*user_id, *client_id, *kind).await,
        }
    }

    async fn plan_user(&self, user: &SyncUser, job_type: JobType) -> Result<UnitPlan> {
        let mut plan = UnitPlan::default();
        let clients = self.registry.clients_for_user(user.id).await;
        if clients.is_empty() {
            debug!(user_id = %user.id, "User has no registered clients");
            return Ok(plan);
        }

        let scope: Vec<ClientId> = clients.iter().map(|c| c.id()).collect();
        let configs = self.jobs.get_sync_job_configs_by_user(user.id).await?;
        let now = self.clock.now();

        for &kind in job_type.media_kinds() {
            if !user.preferences.is_enabled(kind) {
                continue;
            }

            let mut participants: Vec<(ClientHandle, SyncJobConfig)> = Vec::new();
            for client in &clients {
                if !client.supports(Capability::for_kind(kind)) {
                    debug!(client_id = %client.id(), kind = %kind, "Client lacks capability, skipped");
                    plan.skipped += 1;
                    continue;
                }
                let config = self.config_for(user, client, kind, &configs).await?;
                if config.enabled {
                    participants.push((client.clone(), config));
                }
            }

            if kind.is_list() {
                let Some(preferences) = user.preferences.list_preferences(kind) else {
                    continue;
                };
                if participants.len() < 2 || !participants.iter().any(|(_, c)| c.is_due(now)) {
                    continue;
                }
                let (clients, configs): (Vec<_>, Vec<_>) = participants.into_iter().unzip();
                plan.units.push(SyncUnit {
                    user_id: user.id,
                    kind,
                    target: UnitTarget::Lists {
                        clients,
                        preferences: preferences.clone(),
                        focus: None,
                    },
                    configs,
                });
            } else {
                for (client, config) in participants {
                    if !config.is_due(now) {
                        continue;
                    }
                    plan.units.push(SyncUnit {
                        user_id: user.id,
                        kind,
                        target: UnitTarget::Media {
                            client,
                            scope: scope.clone(),
                        },
                        configs: vec![config],
                    });
                }
            }
        }

        Ok(plan)
    }

    async fn plan_manual(
        &self,
        user_id: UserId,
        client_id: ClientId,
        kind: MediaKind,
    ) -> Result<UnitPlan> {
        let user = self
            .users
            .find_user(user_id)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| SyncError::Configuration(format!("user {} is not active", user_id)))?;
        if !user.preferences.is_enabled(kind) {
            return Err(SyncError::Configuration(format!(
                "{} sync is disabled for user {}",
                kind, user_id
            )));
        }

        let clients = self.registry.clients_for_user(user_id).await;
        let client = clients
            .iter()
            .find(|c| c.id() == client_id)
            .cloned()
            .ok_or_else(|| {
                SyncError::Configuration(format!(
                    "client {} is not registered for user {}",
                    client_id, user_id
                ))
            })?;

        let mut plan = UnitPlan::default();
        if !client.supports(Capability::for_kind(kind)) {
            info!("Client lacks capability, nothing to sync");
            plan.skipped += 1;
            return Ok(plan);
        }

        let configs = self.jobs.get_sync_job_configs_by_user(user_id).await?;
        let target = if kind.is_list() {
            let preferences = user
                .preferences
                .list_preferences(kind)
                .cloned()
                .unwrap_or_default();
            UnitTarget::Lists {
                clients: clients
                    .iter()
                    .filter(|c| c.supports(Capability::for_kind(kind)))
                    .cloned()
                    .collect(),
                preferences,
                focus: Some(client_id),
            }
        } else {
            UnitTarget::Media {
                scope: clients.iter().map(|c| c.id()).collect(),
                client: client.clone(),
            }
        };

        let config = self.config_for(&user, &client, kind, &configs).await?;
        plan.units.push(SyncUnit {
            user_id,
            kind,
            target,
            configs: vec![config],
        });
        Ok(plan)
    }

    /// Stored config for (user, client, kind), created with the user's
    /// default frequency when missing.
    async fn config_for(
        &self,
        user: &SyncUser,
        client: &ClientHandle,
        kind: MediaKind,
        existing: &[SyncJobConfig],
    ) -> Result<SyncJobConfig> {
        if let Some(config) = existing
            .iter()
            .find(|c| c.client_id == client.id() && c.media_kind == kind)
        {
            return Ok(config.clone());
        }

        let config = SyncJobConfig::new(
            user.id,
            client.id(),
            client.kind(),
            kind,
            user.preferences.default_frequency(kind),
        );
        self.jobs.update_sync_job_config(&config).await?;
        debug!(user_id = %user.id, client_id = %client.id(), kind = %kind, "Created sync job config");
        Ok(config)
    }
}

/// Why a job run ended `Failed`
enum JobFailure {
    Cancelled,
    TimedOut(Duration),
    Error(SyncError),
    /// Every unit ran but at least one of them failed
    Units(JobSummary),
}

impl From<SyncError> for JobFailure {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::Cancelled => JobFailure::Cancelled,
            other => JobFailure::Error(other),
        }
    }
}

impl JobFailure {
    fn message(&self) -> String {
        match self {
            JobFailure::Cancelled => "Job cancelled".to_string(),
            JobFailure::TimedOut(limit) => format!("Job timed out after {}s", limit.as_secs()),
            JobFailure::Error(e) => e.to_string(),
            JobFailure::Units(summary) => summary.message(),
        }
    }
}
