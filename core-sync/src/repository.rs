//! # Job Repository
//!
//! Persistence for job runs, per-client sync settings and job schedules.
//!
//! ## Overview
//!
//! - Job runs: create, start, progress, completion, history
//! - `SyncJobConfig` records keyed by (user, client, media kind)
//! - `JobSchedule` records keyed by job name
//!
//! Timestamps are stored as Unix seconds.

use crate::job::{
    Frequency, JobRun, JobRunId, JobSchedule, JobStatus, JobType, SyncJobConfig,
};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_library::{ClientId, ClientKind, MediaKind, UserId};
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job run
    async fn create_job_run(&self, run: &JobRun) -> Result<()>;

    /// Move a pending run to running
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if no pending run has this ID
    async fn start_job_run(&self, id: &JobRunId, started_at: DateTime<Utc>) -> Result<()>;

    /// Record progress of a running job. Stored progress never decreases.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if no running job has this ID
    async fn update_job_progress(
        &self,
        id: &JobRunId,
        percent: f64,
        message: Option<&str>,
    ) -> Result<()>;

    /// Move a job run to a terminal status
    ///
    /// # Errors
    ///
    /// - `InvalidValue` if `status` is not terminal
    /// - `JobNotFound` if no active run has this ID
    async fn complete_job_run(
        &self,
        id: &JobRunId,
        status: JobStatus,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn find_job_run(&self, id: &JobRunId) -> Result<Option<JobRun>>;

    /// Most recent runs of a job, newest first
    async fn recent_job_runs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>>;

    async fn get_sync_job_configs_by_user(&self, user_id: UserId) -> Result<Vec<SyncJobConfig>>;

    /// Insert or replace the config for its (user, client, media kind)
    async fn update_sync_job_config(&self, config: &SyncJobConfig) -> Result<()>;

    async fn get_schedule(&self, job_name: &str) -> Result<Option<JobSchedule>>;

    async fn list_schedules(&self) -> Result<Vec<JobSchedule>>;

    /// Insert or replace a schedule by job name
    async fn upsert_schedule(&self, schedule: &JobSchedule) -> Result<()>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_epoch(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_epoch(field: &str, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| SyncError::invalid_value(field, secs.to_string()))
}

fn from_optional_epoch(field: &str, secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(|s| from_epoch(field, s)).transpose()
}

fn parse_kind<T: std::str::FromStr<Err = String>>(field: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SyncError::invalid_value(field, value))
}

#[derive(Debug, FromRow)]
struct JobRunRow {
    id: String,
    job_name: String,
    job_type: String,
    status: String,
    user_id: Option<i64>,
    progress_percent: f64,
    message: Option<String>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = SyncError;

    fn try_from(row: JobRunRow) -> Result<Self> {
        Ok(JobRun {
            id: JobRunId::from_string(&row.id)?,
            job_name: row.job_name,
            job_type: row.job_type.parse()?,
            status: row.status.parse()?,
            user_id: row.user_id.map(UserId),
            progress_percent: row.progress_percent,
            message: row.message,
            started_at: from_optional_epoch("started_at", row.started_at)?,
            completed_at: from_optional_epoch("completed_at", row.completed_at)?,
            created_at: from_epoch("created_at", row.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SyncJobConfigRow {
    user_id: i64,
    client_id: i64,
    client_kind: String,
    media_kind: String,
    frequency: String,
    enabled: bool,
    last_sync_time: Option<i64>,
}

impl TryFrom<SyncJobConfigRow> for SyncJobConfig {
    type Error = SyncError;

    fn try_from(row: SyncJobConfigRow) -> Result<Self> {
        Ok(SyncJobConfig {
            user_id: UserId(row.user_id),
            client_id: ClientId(row.client_id),
            client_kind: parse_kind::<ClientKind>("client_kind", &row.client_kind)?,
            media_kind: parse_kind::<MediaKind>("media_kind", &row.media_kind)?,
            frequency: row.frequency.parse()?,
            enabled: row.enabled,
            last_sync_time: from_optional_epoch("last_sync_time", row.last_sync_time)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct JobScheduleRow {
    job_name: String,
    job_type: String,
    frequency: String,
    enabled: bool,
    last_run_time: Option<i64>,
}

impl TryFrom<JobScheduleRow> for JobSchedule {
    type Error = SyncError;

    fn try_from(row: JobScheduleRow) -> Result<Self> {
        Ok(JobSchedule {
            job_name: row.job_name,
            job_type: row.job_type.parse::<JobType>()?,
            frequency: row.frequency.parse::<Frequency>()?,
            enabled: row.enabled,
            last_run_time: from_optional_epoch("last_run_time", row.last_run_time)?,
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create_job_run(&self, run: &JobRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (
                id, job_name, job_type, status, user_id,
                progress_percent, message, started_at, completed_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(&run.job_name)
        .bind(run.job_type.as_str())
        .bind(run.status.as_str())
        .bind(run.user_id)
        .bind(run.progress_percent)
        .bind(&run.message)
        .bind(run.started_at.map(to_epoch))
        .bind(run.completed_at.map(to_epoch))
        .bind(to_epoch(run.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn start_job_run(&self, id: &JobRunId, started_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_runs SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(to_epoch(started_at))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: id.as_str(),
            });
        }
        Ok(())
    }

    async fn update_job_progress(
        &self,
        id: &JobRunId,
        percent: f64,
        message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs SET
                progress_percent = MAX(progress_percent, ?),
                message = COALESCE(?, message)
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(percent.clamp(0.0, 100.0))
        .bind(message)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: id.as_str(),
            });
        }
        Ok(())
    }

    async fn complete_job_run(
        &self,
        id: &JobRunId,
        status: JobStatus,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(SyncError::invalid_value("status", status.as_str()));
        }

        let result = sqlx::query(
            r#"
            UPDATE job_runs SET
                status = ?,
                message = ?,
                completed_at = ?,
                progress_percent = CASE WHEN ? = 'completed' THEN 100.0 ELSE progress_percent END
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(status.as_str())
        .bind(message)
        .bind(to_epoch(completed_at))
        .bind(status.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: id.as_str(),
            });
        }
        Ok(())
    }

    async fn find_job_run(&self, id: &JobRunId) -> Result<Option<JobRun>> {
        let row = sqlx::query_as::<_, JobRunRow>("SELECT * FROM job_runs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRun::try_from).transpose()
    }

    async fn recent_job_runs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>> {
        let rows = sqlx::query_as::<_, JobRunRow>(
            "SELECT * FROM job_runs WHERE job_name = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(job_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRun::try_from).collect()
    }

    async fn get_sync_job_configs_by_user(&self, user_id: UserId) -> Result<Vec<SyncJobConfig>> {
        let rows = sqlx::query_as::<_, SyncJobConfigRow>(
            "SELECT * FROM sync_job_configs WHERE user_id = ? ORDER BY client_id, media_kind",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncJobConfig::try_from).collect()
    }

    async fn update_sync_job_config(&self, config: &SyncJobConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_job_configs (
                user_id, client_id, client_kind, media_kind, frequency, enabled, last_sync_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, client_id, media_kind) DO UPDATE SET
                client_kind = excluded.client_kind,
                frequency = excluded.frequency,
                enabled = excluded.enabled,
                last_sync_time = excluded.last_sync_time
            "#,
        )
        .bind(config.user_id)
        .bind(config.client_id)
        .bind(config.client_kind.as_str())
        .bind(config.media_kind.as_str())
        .bind(config.frequency.as_str())
        .bind(config.enabled)
        .bind(config.last_sync_time.map(to_epoch))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_schedule(&self, job_name: &str) -> Result<Option<JobSchedule>> {
        let row = sqlx::query_as::<_, JobScheduleRow>(
            "SELECT * FROM job_schedules WHERE job_name = ?",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobSchedule::try_from).transpose()
    }

    async fn list_schedules(&self) -> Result<Vec<JobSchedule>> {
        let rows = sqlx::query_as::<_, JobScheduleRow>(
            "SELECT * FROM job_schedules ORDER BY job_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobSchedule::try_from).collect()
    }

    async fn upsert_schedule(&self, schedule: &JobSchedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_schedules (job_name, job_type, frequency, enabled, last_run_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (job_name) DO UPDATE SET
                job_type = excluded.job_type,
                frequency = excluded.frequency,
                enabled = excluded.enabled,
                last_run_time = excluded.last_run_time
            "#,
        )
        .bind(&schedule.job_name)
        .bind(schedule.job_type.as_str())
        .bind(schedule.frequency.as_str())
        .bind(schedule.enabled)
        .bind(schedule.last_run_time.map(to_epoch))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
