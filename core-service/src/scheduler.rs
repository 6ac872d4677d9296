//! Background loop running due job schedules

use core_sync::SyncCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handle to a running scheduler loop
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for the job in flight, if any, to return.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

pub(crate) fn spawn(coordinator: Arc<SyncCoordinator>, tick: Duration) -> SchedulerHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_ms = tick.as_millis() as u64, "Scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            match coordinator.run_due_jobs().await {
                Ok(runs) if runs.is_empty() => debug!("No schedule due"),
                Ok(runs) => info!(runs = runs.len(), "Scheduled jobs finished"),
                Err(e) => error!(error = %e, "Scheduled run failed"),
            }
        }

        info!("Scheduler stopped");
    });

    SchedulerHandle { cancel, task }
}
