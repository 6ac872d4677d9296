//! Integration tests for runtime configuration, logging and events

use core_runtime::config::{CoreConfig, DatabaseLocation};
use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};

#[test]
fn test_logging_initialization() {
    // Only one global subscriber per process; the second call must fail cleanly.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());

    tracing::info!(job_id = "job-1", "logging initialized");
}

#[test]
fn test_config_carries_logging() {
    let config = CoreConfig::builder()
        .in_memory_database()
        .logging(LoggingConfig::default().with_format(LogFormat::Json))
        .build()
        .unwrap();

    assert_eq!(config.database, DatabaseLocation::InMemory);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[tokio::test]
async fn test_progress_events_in_order() {
    let bus = EventBus::default();
    let mut stream = EventStream::new(bus.subscribe())
        .filter(|event| matches!(event, CoreEvent::Sync(SyncEvent::Progress { .. })));

    for percent in [50.0, 70.83, 91.67, 100.0] {
        bus.emit(CoreEvent::Sync(SyncEvent::Progress {
            job_id: "job-1".to_string(),
            percent,
            message: None,
        }))
        .ok();
    }
    bus.emit(CoreEvent::Sync(SyncEvent::Cancelled {
        job_id: "job-1".to_string(),
    }))
    .ok();

    let seen: Vec<f64> = stream
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            CoreEvent::Sync(SyncEvent::Progress { percent, .. }) => Some(percent),
            _ => None,
        })
        .collect();

    assert_eq!(seen, vec![50.0, 70.83, 91.67, 100.0]);
}
