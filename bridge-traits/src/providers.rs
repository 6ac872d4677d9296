//! Capability Adapter Traits
//!
//! One trait per media domain. A remote client implements any subset of them;
//! callers probe the client's [`Capabilities`](crate::capability::Capabilities)
//! before use.

use async_trait::async_trait;
use core_library::{
    Album, Artist, ListPayload, MediaEntity, MediaKind, Movie, Series, Track,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::MediaQuery;

#[async_trait]
pub trait MovieProvider: Send + Sync {
    async fn get_movies(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Movie>>>;
}

#[async_trait]
pub trait SeriesProvider: Send + Sync {
    async fn get_series(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Series>>>;
}

/// Music libraries expose tracks, albums and artists together
#[async_trait]
pub trait MusicProvider: Send + Sync {
    async fn get_tracks(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Track>>>;

    async fn get_albums(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Album>>>;

    async fn get_artists(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Artist>>>;
}

/// Reference to an item inside a remote list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub remote_item_id: String,
    pub position: u32,
    /// Kind of the referenced item, when the client reports it. Clients whose
    /// item IDs are only unique per kind should always set it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
}

impl ItemRef {
    pub fn new(remote_item_id: impl Into<String>, position: u32) -> Self {
        Self {
            remote_item_id: remote_item_id.into(),
            position,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Read/write access to ordered lists of payload `L`
///
/// Lists returned by [`search_lists`](ListProvider::search_lists) carry their
/// remote list ID as the `SyncClients` entry of the serving client, the list
/// description as `overview` and the remote modification time as
/// `ListData::last_modified_at`. Their `items` are left empty; use
/// [`get_list_items`](ListProvider::get_list_items).
#[async_trait]
pub trait ListProvider<L: ListPayload>: Send + Sync {
    async fn search_lists(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<L>>>;

    /// Items of a list in list order
    async fn get_list_items(&self, list_id: &str) -> Result<Vec<ItemRef>>;

    /// Create an empty list and return its remote ID
    async fn create_list(&self, title: &str, description: Option<&str>) -> Result<String>;

    /// Append an item to the end of a list
    async fn add_item(&self, list_id: &str, item_id: &str) -> Result<()>;
}
