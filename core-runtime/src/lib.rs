//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media sync core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other crates depend on. It
//! establishes the logging conventions and the event broadcasting used to
//! report job progress.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
