//! In-memory capability adapters
//!
//! [`InMemoryProvider`] implements every adapter trait over plain vectors and
//! records each write it receives. It backs local development setups and the
//! engine's tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_library::{
    normalize_title, Album, Artist, ClientId, ClientKind, Collection, ListPayload, MediaData,
    MediaEntity, MediaKind, Movie, Playlist, Series, Track,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::ClientHandle;
use crate::error::{BridgeError, Result};
use crate::providers::{ItemRef, ListProvider, MovieProvider, MusicProvider, SeriesProvider};
use crate::query::{MediaQuery, SortDirection, SortField};

/// Remote list as held by [`InMemoryProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryList {
    pub remote_list_id: String,
    pub title: String,
    pub description: Option<String>,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub items: Vec<String>,
}

impl MemoryList {
    pub fn new(remote_list_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            remote_list_id: remote_list_id.into(),
            title: title.into(),
            description: None,
            last_modified_at: None,
            items: Vec::new(),
        }
    }

    pub fn with_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified_at = Some(at);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Write received by an [`InMemoryProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    CreateList {
        kind: MediaKind,
        title: String,
    },
    AddItem {
        kind: MediaKind,
        list_id: String,
        item_id: String,
    },
}

#[derive(Default)]
struct State {
    movies: Vec<MediaEntity<Movie>>,
    series: Vec<MediaEntity<Series>>,
    tracks: Vec<MediaEntity<Track>>,
    albums: Vec<MediaEntity<Album>>,
    artists: Vec<MediaEntity<Artist>>,
    playlists: Vec<MemoryList>,
    collections: Vec<MemoryList>,
    next_list_id: u64,
    writes: Vec<WriteOp>,
    failing_items: HashSet<String>,
    fail_reads: bool,
    fetch_calls: usize,
}

impl State {
    fn lists(&self, kind: MediaKind) -> &Vec<MemoryList> {
        match kind {
            MediaKind::Collection => &self.collections,
            _ => &self.playlists,
        }
    }

    fn lists_mut(&mut self, kind: MediaKind) -> &mut Vec<MemoryList> {
        match kind {
            MediaKind::Collection => &mut self.collections,
            _ => &mut self.playlists,
        }
    }
}

pub struct InMemoryProvider {
    client_id: ClientId,
    client_kind: ClientKind,
    state: Mutex<State>,
}

impl InMemoryProvider {
    pub fn new(client_id: ClientId, client_kind: ClientKind) -> Self {
        Self {
            client_id,
            client_kind,
            state: Mutex::new(State::default()),
        }
    }

    /// Handle exposing every adapter of this provider
    pub fn handle(self: &Arc<Self>) -> ClientHandle {
        ClientHandle::builder(self.client_id, self.client_kind)
            .movies(self.clone())
            .series(self.clone())
            .music(self.clone())
            .playlists(self.clone())
            .collections(self.clone())
            .build()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_movie(&self, movie: MediaEntity<Movie>) {
        self.state().movies.push(movie);
    }

    pub fn add_series(&self, series: MediaEntity<Series>) {
        self.state().series.push(series);
    }

    pub fn add_track(&self, track: MediaEntity<Track>) {
        self.state().tracks.push(track);
    }

    pub fn add_album(&self, album: MediaEntity<Album>) {
        self.state().albums.push(album);
    }

    pub fn add_artist(&self, artist: MediaEntity<Artist>) {
        self.state().artists.push(artist);
    }

    pub fn add_list(&self, kind: MediaKind, list: MemoryList) {
        self.state().lists_mut(kind).push(list);
    }

    /// Make every subsequent read fail with a remote error
    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    /// Make `add_item` fail for this remote item ID
    pub fn fail_add_for(&self, item_id: impl Into<String>) {
        self.state().failing_items.insert(item_id.into());
    }

    pub fn list(&self, kind: MediaKind, title: &str) -> Option<MemoryList> {
        self.state()
            .lists(kind)
            .iter()
            .find(|l| l.title == title)
            .cloned()
    }

    pub fn writes(&self) -> Vec<WriteOp> {
        self.state().writes.clone()
    }

    /// Number of catalog read calls served
    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    fn read<T: MediaData>(
        &self,
        select: impl FnOnce(&State) -> &Vec<MediaEntity<T>>,
        query: &MediaQuery,
    ) -> Result<Vec<MediaEntity<T>>> {
        let mut state = self.state();
        state.fetch_calls += 1;
        if state.fail_reads {
            return Err(BridgeError::RemoteCall(format!(
                "client {} unavailable",
                self.client_id
            )));
        }
        Ok(apply_query(select(&*state).clone(), query))
    }

    fn search<L: ListPayload>(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<L>>> {
        let state = self.state();
        if state.fail_reads {
            return Err(BridgeError::RemoteCall(format!(
                "client {} unavailable",
                self.client_id
            )));
        }

        let lists = state
            .lists(L::KIND)
            .iter()
            .map(|list| {
                let mut payload = L::default();
                payload.list_mut().last_modified_at = list.last_modified_at;
                let mut entity = MediaEntity::from_remote(
                    self.client_id,
                    self.client_kind,
                    list.remote_list_id.clone(),
                    list.title.clone(),
                    payload,
                );
                entity.overview = list.description.clone();
                entity
            })
            .collect();

        Ok(apply_query(lists, query))
    }

    fn items(&self, kind: MediaKind, list_id: &str) -> Result<Vec<ItemRef>> {
        let state = self.state();
        let list = state
            .lists(kind)
            .iter()
            .find(|l| l.remote_list_id == list_id)
            .ok_or_else(|| BridgeError::NotFound(format!("list {}", list_id)))?;

        Ok(list
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| ItemRef::new(item.clone(), position as u32))
            .collect())
    }

    fn create(&self, kind: MediaKind, title: &str, description: Option<&str>) -> Result<String> {
        let mut state = self.state();
        state.next_list_id += 1;
        let remote_list_id = format!("{}-{}-{}", self.client_id, kind, state.next_list_id);

        let mut list = MemoryList::new(remote_list_id.clone(), title);
        list.description = description.map(str::to_string);
        list.last_modified_at = Some(Utc::now());
        state.lists_mut(kind).push(list);
        state.writes.push(WriteOp::CreateList {
            kind,
            title: title.to_string(),
        });

        Ok(remote_list_id)
    }

    fn add(&self, kind: MediaKind, list_id: &str, item_id: &str) -> Result<()> {
        let mut state = self.state();
        if state.failing_items.contains(item_id) {
            return Err(BridgeError::RemoteCall(format!("cannot add {}", item_id)));
        }

        let list = state
            .lists_mut(kind)
            .iter_mut()
            .find(|l| l.remote_list_id == list_id)
            .ok_or_else(|| BridgeError::NotFound(format!("list {}", list_id)))?;
        list.items.push(item_id.to_string());
        list.last_modified_at = Some(Utc::now());

        state.writes.push(WriteOp::AddItem {
            kind,
            list_id: list_id.to_string(),
            item_id: item_id.to_string(),
        });
        Ok(())
    }
}

fn apply_query<T: MediaData>(
    mut entities: Vec<MediaEntity<T>>,
    query: &MediaQuery,
) -> Vec<MediaEntity<T>> {
    if let Some(text) = &query.text {
        let needle = normalize_title(text);
        entities.retain(|e| e.normalized_title().contains(&needle));
    }
    if let Some(id) = &query.external_id {
        entities.retain(|e| e.external_ids.contains(id));
    }
    if let Some((field, direction)) = query.sort {
        match field {
            SortField::Title => entities.sort_by_key(|e| e.normalized_title()),
            SortField::ReleaseDate => entities.sort_by_key(|e| (e.release_date, e.year())),
            SortField::DateAdded => {}
        }
        if direction == SortDirection::Desc {
            entities.reverse();
        }
    }

    let offset = query.offset as usize;
    let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    entities.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl MovieProvider for InMemoryProvider {
    async fn get_movies(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Movie>>> {
        self.read(|s| &s.movies, query)
    }
}

#[async_trait]
impl SeriesProvider for InMemoryProvider {
    async fn get_series(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Series>>> {
        self.read(|s| &s.series, query)
    }
}

#[async_trait]
impl MusicProvider for InMemoryProvider {
    async fn get_tracks(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Track>>> {
        self.read(|s| &s.tracks, query)
    }

    async fn get_albums(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Album>>> {
        self.read(|s| &s.albums, query)
    }

    async fn get_artists(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Artist>>> {
        self.read(|s| &s.artists, query)
    }
}

#[async_trait]
impl ListProvider<Playlist> for InMemoryProvider {
    async fn search_lists(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Playlist>>> {
        self.search(query)
    }

    async fn get_list_items(&self, list_id: &str) -> Result<Vec<ItemRef>> {
        self.items(MediaKind::Playlist, list_id)
    }

    async fn create_list(&self, title: &str, description: Option<&str>) -> Result<String> {
        self.create(MediaKind::Playlist, title, description)
    }

    async fn add_item(&self, list_id: &str, item_id: &str) -> Result<()> {
        self.add(MediaKind::Playlist, list_id, item_id)
    }
}

#[async_trait]
impl ListProvider<Collection> for InMemoryProvider {
    async fn search_lists(&self, query: &MediaQuery) -> Result<Vec<MediaEntity<Collection>>> {
        self.search(query)
    }

    async fn get_list_items(&self, list_id: &str) -> Result<Vec<ItemRef>> {
        self.items(MediaKind::Collection, list_id)
    }

    async fn create_list(&self, title: &str, description: Option<&str>) -> Result<String> {
        self.create(MediaKind::Collection, title, description)
    }

    async fn add_item(&self, list_id: &str, item_id: &str) -> Result<()> {
        self.add(MediaKind::Collection, list_id, item_id)
    }
}
