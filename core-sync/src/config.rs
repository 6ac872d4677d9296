//! Sync engine tuning

use crate::{Result, SyncError};
use core_library::ExternalSource;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote items handed to one match/merge/persist chunk
    pub batch_size: usize,

    /// Items requested per adapter page
    pub page_size: u32,

    /// Upper bound on sync units (user, client, media kind) running at once
    pub max_concurrent_clients: usize,

    /// Deadline for a single adapter call (milliseconds)
    pub remote_timeout_ms: u64,

    /// Extra attempts after a failed adapter call
    pub remote_retries: u32,

    /// Backoff before the first retry, doubled on each further retry (milliseconds)
    pub retry_base_delay_ms: u64,

    /// Deadline for a whole job run (seconds); `None` means unbounded
    pub job_timeout_secs: Option<u64>,

    /// External identifier sources trusted for cross-client matching
    pub trusted_sources: Vec<ExternalSource>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            page_size: 200,
            max_concurrent_clients: 4,
            remote_timeout_ms: 30_000,
            remote_retries: 1,
            retry_base_delay_ms: 500,
            job_timeout_secs: None,
            trusted_sources: vec![
                ExternalSource::Tmdb,
                ExternalSource::Imdb,
                ExternalSource::Tvdb,
                ExternalSource::MusicBrainz,
            ],
        }
    }
}

impl SyncConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_concurrent_clients(mut self, max: usize) -> Self {
        self.max_concurrent_clients = max;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_remote_retries(mut self, retries: u32) -> Self {
        self.remote_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    pub fn with_trusted_sources(mut self, sources: Vec<ExternalSource>) -> Self {
        self.trusted_sources = sources;
        self
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(SyncError::Configuration(
                "page_size must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_clients == 0 {
            return Err(SyncError::Configuration(
                "max_concurrent_clients must be greater than 0".to_string(),
            ));
        }
        if self.remote_timeout_ms == 0 {
            return Err(SyncError::Configuration(
                "remote_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(SyncError::Configuration(
                "job_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }
        if self.trusted_sources.contains(&ExternalSource::Client) {
            return Err(SyncError::Configuration(
                "client-scoped identifiers cannot be trusted for cross-client matching"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
