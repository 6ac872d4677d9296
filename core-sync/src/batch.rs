//! # Batch Runner
//!
//! Splits a result set into fixed-size chunks, hands each chunk to a
//! [`ChunkProcessor`] and reports linear progress after every chunk.
//!
//! ## Progress
//!
//! Within a range `[lower, upper]` the value reported after a chunk is
//! `lower + (processed / total) * (upper - lower)`. The first report is
//! `lower` and the last is exactly `upper`, so the sequence is
//! non-decreasing. 120 items with a batch size of 50 in `[50, 100]` report
//! `50, 70.83, 91.67, 100`.
//!
//! ## Failures
//!
//! Processors recover per-item failures themselves and count them in
//! [`SyncStats`]. An `Err` returned for a whole chunk stops the run and is
//! returned to the caller. The cancellation token is checked before every
//! chunk.

use crate::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-item outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Items skipped because of a recoverable error
    pub failed: u64,
}

impl SyncStats {
    pub fn processed(&self) -> u64 {
        self.created + self.updated + self.unchanged + self.failed
    }

    pub fn absorb(&mut self, other: SyncStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

/// Progress interval a batch run reports into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub lower: f64,
    pub upper: f64,
}

impl ProgressRange {
    /// # Errors
    ///
    /// Returns `Configuration` unless `0 <= lower <= upper <= 100`
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&lower) || !(0.0..=100.0).contains(&upper) || lower > upper {
            return Err(SyncError::Configuration(format!(
                "invalid progress range [{}, {}]",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn full() -> Self {
        Self {
            lower: 0.0,
            upper: 100.0,
        }
    }

    /// Linear interpolation of `processed / total` into the range.
    pub fn at(&self, processed: usize, total: usize) -> f64 {
        if total == 0 || processed >= total {
            return self.upper;
        }
        self.lower + (processed as f64 / total as f64) * (self.upper - self.lower)
    }
}

/// Receives progress reports
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, percent: f64, message: Option<String>) -> Result<()>;
}

/// Match, merge and persist one chunk
#[async_trait]
pub trait ChunkProcessor<I: Send + Sync>: Send + Sync {
    async fn process_chunk(&self, chunk: &[I], cancel: &CancellationToken) -> Result<SyncStats>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub chunks: usize,
    pub stats: SyncStats,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchRunner {
    batch_size: usize,
}

impl BatchRunner {
    /// # Errors
    ///
    /// Returns `Configuration` if `batch_size` is zero
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(SyncError::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn run<I: Send + Sync>(
        &self,
        items: &[I],
        range: ProgressRange,
        processor: &dyn ChunkProcessor<I>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let total = items.len();
        let mut processed = 0;
        let mut outcome = BatchOutcome {
            chunks: 0,
            stats: SyncStats::default(),
        };

        progress.report(range.lower, None).await?;

        for chunk in items.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let stats = processor.process_chunk(chunk, cancel).await?;
            outcome.stats.absorb(stats);
            outcome.chunks += 1;
            processed += chunk.len();

            debug!(
                chunk = outcome.chunks,
                processed, total, "Processed batch"
            );
            progress
                .report(
                    range.at(processed, total),
                    Some(format!("Processed {} of {} items", processed, total)),
                )
                .await?;
        }

        if total == 0 {
            progress.report(range.upper, None).await?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, percent: f64, _message: Option<String>) -> Result<()> {
            self.reports.lock().unwrap().push(percent);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProcessor {
        chunk_sizes: Mutex<Vec<usize>>,
        fail_on_chunk: Option<usize>,
        cancel_after_chunk: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl ChunkProcessor<u32> for CountingProcessor {
        async fn process_chunk(
            &self,
            chunk: &[u32],
            _cancel: &CancellationToken,
        ) -> Result<SyncStats> {
            let index = {
                let mut sizes = self.chunk_sizes.lock().unwrap();
                sizes.push(chunk.len());
                sizes.len()
            };
            if self.fail_on_chunk == Some(index) {
                return Err(SyncError::Persistence(core_library::LibraryError::Migration(
                    "disk full".to_string(),
                )));
            }
            if let Some((after, token)) = &self.cancel_after_chunk {
                if *after == index {
                    token.cancel();
                }
            }
            let failed = chunk.iter().filter(|v| **v % 10 == 0).count() as u64;
            Ok(SyncStats {
                created: chunk.len() as u64 - failed,
                failed,
                ..SyncStats::default()
            })
        }
    }

    fn items(n: u32) -> Vec<u32> {
        (1..=n).collect()
    }

    #[tokio::test]
    async fn test_chunks_and_progress_sequence() {
        let runner = BatchRunner::new(50).unwrap();
        let processor = CountingProcessor::default();
        let sink = RecordingSink::default();

        let outcome = runner
            .run(
                &items(120),
                ProgressRange::new(50.0, 100.0).unwrap(),
                &processor,
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(*processor.chunk_sizes.lock().unwrap(), vec![50, 50, 20]);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(outcome.stats.processed(), 120);
        assert_eq!(outcome.stats.failed, 12);

        let reports = sink.reports.lock().unwrap().clone();
        let expected = [50.0, 70.833, 91.667, 100.0];
        assert_eq!(reports.len(), expected.len());
        for (got, want) in reports.iter().zip(expected) {
            assert!((got - want).abs() < 0.01, "got {} want {}", got, want);
        }
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*reports.last().unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_empty_input_reports_bounds() {
        let runner = BatchRunner::new(10).unwrap();
        let sink = RecordingSink::default();

        let outcome = runner
            .run(
                &items(0),
                ProgressRange::new(20.0, 40.0).unwrap(),
                &CountingProcessor::default(),
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 0);
        assert_eq!(*sink.reports.lock().unwrap(), vec![20.0, 40.0]);
    }

    #[tokio::test]
    async fn test_chunk_failure_stops_run() {
        let runner = BatchRunner::new(10).unwrap();
        let processor = CountingProcessor {
            fail_on_chunk: Some(2),
            ..CountingProcessor::default()
        };

        let result = runner
            .run(
                &items(45),
                ProgressRange::full(),
                &processor,
                &RecordingSink::default(),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(SyncError::Persistence(_))));
        assert_eq!(processor.chunk_sizes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_chunks() {
        let token = CancellationToken::new();
        let runner = BatchRunner::new(10).unwrap();
        let processor = CountingProcessor {
            cancel_after_chunk: Some((1, token.clone())),
            ..CountingProcessor::default()
        };

        let result = runner
            .run(
                &items(45),
                ProgressRange::full(),
                &processor,
                &RecordingSink::default(),
                &token,
            )
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(processor.chunk_sizes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(BatchRunner::new(0).is_err());
        assert!(ProgressRange::new(60.0, 50.0).is_err());
        assert!(ProgressRange::new(-1.0, 50.0).is_err());
        assert!(ProgressRange::new(0.0, 101.0).is_err());
    }
}
