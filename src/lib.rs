//! Workspace umbrella crate.
//!
//! Hosts depend on `media-sync-workspace` and get the bootstrapped core through
//! the default `service` feature, without wiring `core-service`, `core-sync`
//! and `core-library` individually.

#[cfg(feature = "service")]
pub use core_service::{CoreError, CoreService, Result, SchedulerHandle, ServiceConfig};
