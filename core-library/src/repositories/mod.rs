//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! - `MediaRepository` - canonical media entities of every kind, indexed by
//!   client mapping, external identifier and normalized title/year

pub mod media;

pub use media::{MediaRecord, MediaRepository, SqliteMediaRepository};
