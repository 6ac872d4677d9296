//! # Job Run State Machine
//!
//! Lifecycle of sync job runs and the persisted schedule records that trigger
//! them.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Completed
//!     ↓         ↓
//!     └──────→ Failed
//! ```
//!
//! Progress of a running job only moves forward: an update lower than the
//! current value is ignored.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{JobRun, JobType};
//!
//! let run = JobRun::new("media.sync", JobType::MediaSync, None, now);
//! let mut run = run.start(now)?;
//! run.update_progress(50.0, Some("movies".to_string()))?;
//! let run = run.complete("Synced 120 items".to_string(), later)?;
//! ```

use crate::{Result, SyncError};
use chrono::{DateTime, Duration, Utc};
use core_library::{ClientId, ClientKind, MediaKind, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRunId(Uuid);

impl JobRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job run ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for JobRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but not yet started
    Pending,
    Running,
    Completed,
    /// Ended by an escalated error, a cancellation or a timeout
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(SyncError::invalid_value("status", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Family of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Catalog reconciliation (movies, series, music)
    MediaSync,
    /// Playlist and collection propagation
    ListSync,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::MediaSync => "media_sync",
            JobType::ListSync => "list_sync",
        }
    }

    /// Name used for the job's schedule record
    pub fn default_job_name(&self) -> &'static str {
        match self {
            JobType::MediaSync => "media.sync",
            JobType::ListSync => "list.sync",
        }
    }

    pub fn media_kinds(&self) -> &'static [MediaKind] {
        match self {
            JobType::MediaSync => &MediaKind::CATALOG,
            JobType::ListSync => &MediaKind::LISTS,
        }
    }

    pub fn for_kind(kind: MediaKind) -> Self {
        if kind.is_list() {
            JobType::ListSync
        } else {
            JobType::MediaSync
        }
    }
}

impl FromStr for JobType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "media_sync" => Ok(JobType::MediaSync),
            "list_sync" => Ok(JobType::ListSync),
            _ => Err(SyncError::invalid_value("job_type", s)),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How often a scheduled sync runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Only on explicit request
    #[default]
    Manual,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Manual => "manual",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Frequency::Manual => None,
            Frequency::Daily => Some(Duration::days(1)),
            Frequency::Weekly => Some(Duration::days(7)),
            Frequency::Monthly => Some(Duration::days(30)),
        }
    }

    /// Whether a run is due at `now` given the previous run time.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match (self.interval(), last_run) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(interval), Some(last)) => now - last >= interval,
        }
    }
}

impl FromStr for Frequency {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Frequency::Manual),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(SyncError::invalid_value("frequency", s)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Job Run Entity
// ============================================================================

/// One execution of a scheduled or manual job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub job_name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Set for runs scoped to one user
    pub user_id: Option<UserId>,
    /// Progress percentage (0-100), non-decreasing within a run
    pub progress_percent: f64,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobRun {
    pub fn new(
        job_name: impl Into<String>,
        job_type: JobType,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobRunId::new(),
            job_name: job_name.into(),
            job_type,
            status: JobStatus::Pending,
            user_id,
            progress_percent: 0.0,
            message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the run is not `Pending`
    pub fn start(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(self)
    }

    /// Record progress. Values are clamped to 0-100 and never move backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not `Running`
    pub fn update_progress(&mut self, percent: f64, message: Option<String>) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Job must be running to update progress".to_string(),
            });
        }

        let percent = percent.clamp(0.0, 100.0);
        if percent > self.progress_percent {
            self.progress_percent = percent;
        }
        if message.is_some() {
            self.message = message;
        }
        Ok(())
    }

    pub fn complete(mut self, message: String, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress_percent = 100.0;
        self.message = Some(message);
        self.completed_at = Some(now);
        Ok(self)
    }

    pub fn fail(mut self, message: String, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.message = Some(message);
        self.completed_at = Some(now);
        Ok(self)
    }

    /// Returns None if the run hasn't started or completed yet
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds().max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: JobStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Schedules
// ============================================================================

/// Per-(user, client, media kind) sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobConfig {
    pub user_id: UserId,
    pub client_id: ClientId,
    pub client_kind: ClientKind,
    pub media_kind: MediaKind,
    pub frequency: Frequency,
    pub enabled: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncJobConfig {
    pub fn new(
        user_id: UserId,
        client_id: ClientId,
        client_kind: ClientKind,
        media_kind: MediaKind,
        frequency: Frequency,
    ) -> Self {
        Self {
            user_id,
            client_id,
            client_kind,
            media_kind,
            frequency,
            enabled: true,
            last_sync_time: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.frequency.is_due(self.last_sync_time, now)
    }
}

/// Persisted schedule of a named job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub job_name: String,
    pub job_type: JobType,
    pub frequency: Frequency,
    pub enabled: bool,
    pub last_run_time: Option<DateTime<Utc>>,
}

impl JobSchedule {
    pub fn new(job_type: JobType, frequency: Frequency) -> Self {
        Self {
            job_name: job_type.default_job_name().to_string(),
            job_type,
            frequency,
            enabled: true,
            last_run_time: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.frequency.is_due(self.last_run_time, now)
    }
}

// ============================================================================
// Tests
// ============================================================================
