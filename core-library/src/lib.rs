//! # Media Library Module
//!
//! Owns the canonical local media records and their persistence.
//!
//! ## Overview
//!
//! This module manages:
//! - The media data model: `MediaEntity<T>` with typed payloads for movies,
//!   series, music and ordered lists
//! - Client mappings (`SyncClients`) and external identifiers
//! - SQLite schema, migrations and connection pooling
//! - The media repository and a typed store with optimistic writes

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{
    normalize_title, Album, AlbumTrack, Artist, ChangeRecord, ClientId, ClientKind, Collection,
    ExternalId, ExternalIds, ExternalSource, ItemSyncStatus, ListChange, ListData, ListEntity,
    ListItem, ListPayload, ListSyncState, ListSyncStates, MediaData, MediaEntity, MediaId,
    MediaKind, Movie, Playlist, Season, Series, SyncClient, SyncClients, Track, UserId,
};
pub use repositories::{MediaRecord, MediaRepository, SqliteMediaRepository};
pub use store::{MediaStore, WriteOutcome, MAX_WRITE_ATTEMPTS};
