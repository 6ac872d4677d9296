//! # Client Bridge Traits
//!
//! Capability adapters that remote media servers implement.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync engine and the clients of
//! individual media servers. Each adapter trait covers one media domain; a
//! client implements any subset of them and exposes what it supports through
//! a [`ClientHandle`](client::ClientHandle).
//!
//! ## Traits
//!
//! ### Catalog reads
//! - [`MovieProvider`](providers::MovieProvider)
//! - [`SeriesProvider`](providers::SeriesProvider)
//! - [`MusicProvider`](providers::MusicProvider) - tracks, albums and artists
//!
//! ### Lists
//! - [`ListProvider`](providers::ListProvider) - search, read, create and append
//!   for playlists and collections
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Probing
//!
//! Callers check [`Capabilities`](capability::Capabilities) before use. The
//! typed accessors on `ClientHandle` return `None` for a missing adapter and
//! [`RemoteMedia::fetch`](client::RemoteMedia::fetch) fails with
//! [`BridgeError::NotSupported`].
//!
//! ## Thread Safety
//!
//! All adapter traits require `Send + Sync` so one client can serve several
//! concurrent sync units.

pub mod capability;
pub mod client;
pub mod error;
pub mod memory;
pub mod providers;
pub mod query;
pub mod time;

pub use error::BridgeError;

pub use capability::{Capabilities, Capability};
pub use client::{ClientHandle, ClientHandleBuilder, RemoteList, RemoteMedia};
pub use memory::{InMemoryProvider, MemoryList, WriteOp};
pub use providers::{ItemRef, ListProvider, MovieProvider, MusicProvider, SeriesProvider};
pub use query::{MediaQuery, SortDirection, SortField};
pub use time::{Clock, FixedClock, SystemClock};
