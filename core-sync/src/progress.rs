//! Job-level progress aggregation
//!
//! A job fans out into independent units. Each unit reports its own 0-100
//! progress through a [`UnitProgress`]; the job value is the mean over all
//! units. The aggregate is only persisted and broadcast when it increases, so
//! concurrent units can never move job progress backwards.

use crate::batch::ProgressSink;
use crate::job::JobRunId;
use crate::repository::JobRepository;
use crate::Result;
use async_trait::async_trait;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

struct ProgressState {
    units: Vec<f64>,
    reported: f64,
}

pub struct JobProgress {
    job_id: JobRunId,
    repository: Arc<dyn JobRepository>,
    event_bus: Arc<EventBus>,
    state: Mutex<ProgressState>,
}

impl JobProgress {
    pub fn new(
        job_id: JobRunId,
        repository: Arc<dyn JobRepository>,
        event_bus: Arc<EventBus>,
        units: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            repository,
            event_bus,
            state: Mutex::new(ProgressState {
                units: vec![0.0; units],
                reported: 0.0,
            }),
        })
    }

    /// Sink for unit `index`; `label` prefixes progress messages.
    pub fn unit(self: &Arc<Self>, index: usize, label: impl Into<String>) -> UnitProgress {
        UnitProgress {
            job: Arc::clone(self),
            index,
            label: label.into(),
        }
    }

    /// Last value persisted for the job
    pub async fn current(&self) -> f64 {
        self.state.lock().await.reported
    }

    /// Record unit progress and persist the aggregate if it increased.
    pub async fn record(&self, index: usize, percent: f64, message: Option<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(unit) = state.units.get_mut(index) else {
            return Ok(());
        };
        *unit = unit.max(percent.clamp(0.0, 100.0));

        let overall = state.units.iter().sum::<f64>() / state.units.len() as f64;
        if overall <= state.reported {
            return Ok(());
        }
        state.reported = overall;

        trace!(job_id = %self.job_id, unit = index, percent = overall, "Job progress");
        self.repository
            .update_job_progress(&self.job_id, overall, message.as_deref())
            .await?;
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Progress {
                job_id: self.job_id.as_str(),
                percent: overall,
                message,
            }))
            .ok();

        Ok(())
    }

    /// Count a unit as done regardless of how it ended.
    pub async fn finish_unit(&self, index: usize) -> Result<()> {
        self.record(index, 100.0, None).await
    }
}

/// Progress sink scoped to one unit of a job
pub struct UnitProgress {
    job: Arc<JobProgress>,
    index: usize,
    label: String,
}

impl UnitProgress {
    pub async fn finish(&self) -> Result<()> {
        self.job.finish_unit(self.index).await
    }
}

#[async_trait]
impl ProgressSink for UnitProgress {
    async fn report(&self, percent: f64, message: Option<String>) -> Result<()> {
        let message = message.map(|m| format!("{}: {}", self.label, m));
        self.job.record(self.index, percent, message).await
    }
}
