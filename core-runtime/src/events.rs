//! # Event Bus System
//!
//! Broadcasts engine activity to interested observers using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps job lifecycle events ([`SyncEvent`])
//!   and local store changes ([`LibraryEvent`])
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with an optional filter
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Cancelled {
//!         job_id: "job-1".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! Publishing never blocks. With no subscribers `emit` returns an error that
//! publishers ignore with `.ok()`. Slow subscribers receive
//! `RecvError::Lagged(n)` and can continue; `RecvError::Closed` means every
//! sender was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Job lifecycle events
    Sync(SyncEvent),
    /// Local store changes
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::UnitFinished { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Started { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of a job run and of the units it fans out to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Job run moved to running.
    Started {
        job_id: String,
        job_name: String,
        user_id: Option<i64>,
    },
    /// Aggregate job progress changed.
    Progress {
        job_id: String,
        /// Progress percentage (0-100), non-decreasing within a run.
        percent: f64,
        message: Option<String>,
    },
    /// One unit of a job finished. List units span every client of the
    /// user and carry no `client_id`.
    UnitFinished {
        job_id: String,
        user_id: i64,
        client_id: Option<i64>,
        media_kind: String,
        created: u64,
        updated: u64,
        failed: u64,
    },
    /// Job run completed.
    Completed {
        job_id: String,
        message: String,
        duration_secs: u64,
    },
    /// Job run failed.
    Failed { job_id: String, message: String },
    /// Job run was cancelled.
    Cancelled { job_id: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::UnitFinished { .. } => "Sync unit finished",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// New entity created from a remote record.
    MediaAdded {
        media_id: i64,
        kind: String,
        title: String,
    },
    /// Existing entity changed by a merge.
    MediaUpdated { media_id: i64, kind: String },
    /// List pushed from one client to another.
    ListSynced {
        media_id: i64,
        kind: String,
        source_client: i64,
        target_client: i64,
        items_added: u64,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::MediaAdded { .. } => "Media added to library",
            LibraryEvent::MediaUpdated { .. } => "Media updated",
            LibraryEvent::ListSynced { .. } => "List synchronized",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drain every buffered matching event.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(job_id: &str) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Completed {
            job_id: job_id.to_string(),
            message: "done".to_string(),
            duration_secs: 1,
        })
    }

    #[test]
    fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(completed("a")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        assert_eq!(bus.emit(completed("a")).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), completed("a"));
        assert_eq!(sub2.recv().await.unwrap(), completed("a"));
    }

    #[tokio::test]
    async fn test_event_stream_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Library(_)));

        bus.emit(completed("a")).ok();
        bus.emit(CoreEvent::Library(LibraryEvent::MediaUpdated {
            media_id: 7,
            kind: "movie".to_string(),
        }))
        .ok();

        let event = stream.recv().await.unwrap();
        assert!(matches!(
            event,
            CoreEvent::Library(LibraryEvent::MediaUpdated { media_id: 7, .. })
        ));
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_severity() {
        let failed = CoreEvent::Sync(SyncEvent::Failed {
            job_id: "a".to_string(),
            message: "boom".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(completed("a").severity(), EventSeverity::Info);

        let unit = CoreEvent::Sync(SyncEvent::UnitFinished {
            job_id: "a".to_string(),
            user_id: 1,
            client_id: Some(2),
            media_kind: "movie".to_string(),
            created: 1,
            updated: 0,
            failed: 3,
        });
        assert_eq!(unit.severity(), EventSeverity::Warning);
    }

    #[test]
    fn test_event_serialization_tags() {
        let json = serde_json::to_value(completed("job-9")).unwrap();
        assert_eq!(json["type"], "Sync");
        assert_eq!(json["payload"]["event"], "Completed");
    }
}
