//! Domain models for the media library
//!
//! Every media kind shares the common fields of [`MediaEntity`] and carries a
//! typed payload implementing [`MediaData`]. Lists (playlists and collections)
//! carry a [`ListData`] payload holding ordered item references and the
//! per-client sync state of the list.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ID Types
// =============================================================================

/// Local identifier of a stored media entity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MediaId(pub i64);

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MediaId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of a registered remote media client
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ClientId(pub i64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ClientId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of a user owning clients and sync preferences
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Remote media server flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Emby,
    Jellyfin,
    Plex,
    Subsonic,
    Radarr,
    Sonarr,
    Lidarr,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Emby => "emby",
            ClientKind::Jellyfin => "jellyfin",
            ClientKind::Plex => "plex",
            ClientKind::Subsonic => "subsonic",
            ClientKind::Radarr => "radarr",
            ClientKind::Sonarr => "sonarr",
            ClientKind::Lidarr => "lidarr",
        }
    }
}

impl FromStr for ClientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emby" => Ok(ClientKind::Emby),
            "jellyfin" => Ok(ClientKind::Jellyfin),
            "plex" => Ok(ClientKind::Plex),
            "subsonic" => Ok(ClientKind::Subsonic),
            "radarr" => Ok(ClientKind::Radarr),
            "sonarr" => Ok(ClientKind::Sonarr),
            "lidarr" => Ok(ClientKind::Lidarr),
            _ => Err(format!("Invalid client kind: {}", s)),
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tag identifying the payload carried by a [`MediaEntity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
    Track,
    Album,
    Artist,
    Playlist,
    Collection,
}

impl MediaKind {
    /// Kinds reconciled item by item through the batch pipeline.
    pub const CATALOG: [MediaKind; 5] = [
        MediaKind::Movie,
        MediaKind::Series,
        MediaKind::Track,
        MediaKind::Album,
        MediaKind::Artist,
    ];

    /// Kinds synchronized as ordered lists between clients.
    pub const LISTS: [MediaKind; 2] = [MediaKind::Playlist, MediaKind::Collection];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "series",
            MediaKind::Track => "track",
            MediaKind::Album => "album",
            MediaKind::Artist => "artist",
            MediaKind::Playlist => "playlist",
            MediaKind::Collection => "collection",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, MediaKind::Playlist | MediaKind::Collection)
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaKind::Movie),
            "series" => Ok(MediaKind::Series),
            "track" => Ok(MediaKind::Track),
            "album" => Ok(MediaKind::Album),
            "artist" => Ok(MediaKind::Artist),
            "playlist" => Ok(MediaKind::Playlist),
            "collection" => Ok(MediaKind::Collection),
            _ => Err(format!("Invalid media kind: {}", s)),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-client mapping state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemSyncStatus {
    #[default]
    Synced,
    Pending,
    Failed,
}

impl ItemSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSyncStatus::Synced => "synced",
            ItemSyncStatus::Pending => "pending",
            ItemSyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for ItemSyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(ItemSyncStatus::Synced),
            "pending" => Ok(ItemSyncStatus::Pending),
            "failed" => Ok(ItemSyncStatus::Failed),
            _ => Err(format!("Invalid item sync status: {}", s)),
        }
    }
}

/// Source namespace of an external identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalSource {
    Tmdb,
    Imdb,
    Tvdb,
    MusicBrainz,
    Trakt,
    /// Identifier scoped to a single remote client; never trusted for matching.
    Client,
}

impl ExternalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalSource::Tmdb => "tmdb",
            ExternalSource::Imdb => "imdb",
            ExternalSource::Tvdb => "tvdb",
            ExternalSource::MusicBrainz => "musicbrainz",
            ExternalSource::Trakt => "trakt",
            ExternalSource::Client => "client",
        }
    }
}

impl FromStr for ExternalSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tmdb" => Ok(ExternalSource::Tmdb),
            "imdb" => Ok(ExternalSource::Imdb),
            "tvdb" => Ok(ExternalSource::Tvdb),
            "musicbrainz" => Ok(ExternalSource::MusicBrainz),
            "trakt" => Ok(ExternalSource::Trakt),
            "client" => Ok(ExternalSource::Client),
            _ => Err(format!("Invalid external source: {}", s)),
        }
    }
}

impl fmt::Display for ExternalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Mappings
// =============================================================================

/// Identifier of an item in an external catalogue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub source: ExternalSource,
    pub value: String,
}

impl ExternalId {
    pub fn new(source: ExternalSource, value: impl Into<String>) -> Self {
        Self {
            source,
            value: value.into(),
        }
    }
}

/// Set of external identifiers, unique by `(source, value)`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalIds(Vec<ExternalId>);

impl ExternalIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identifier unless the same pair is already present.
    pub fn insert(&mut self, id: ExternalId) -> bool {
        if self.0.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    pub fn union(&mut self, other: &ExternalIds) {
        for id in other.iter() {
            self.insert(id.clone());
        }
    }

    pub fn contains(&self, id: &ExternalId) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExternalId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ExternalId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ExternalId> for ExternalIds {
    fn from_iter<I: IntoIterator<Item = ExternalId>>(iter: I) -> Self {
        let mut ids = ExternalIds::new();
        for id in iter {
            ids.insert(id);
        }
        ids
    }
}

/// Mapping of a local entity onto one remote client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncClient {
    pub client_id: ClientId,
    pub client_kind: ClientKind,
    pub remote_item_id: String,
    pub status: ItemSyncStatus,
}

impl SyncClient {
    pub fn new(client_id: ClientId, client_kind: ClientKind, remote_item_id: impl Into<String>) -> Self {
        Self {
            client_id,
            client_kind,
            remote_item_id: remote_item_id.into(),
            status: ItemSyncStatus::Synced,
        }
    }
}

/// Client mappings of an entity, at most one per `ClientId`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<SyncClient>", into = "Vec<SyncClient>")]
pub struct SyncClients(Vec<SyncClient>);

impl SyncClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mapping, replacing any existing entry for the same client in place.
    pub fn upsert(&mut self, mapping: SyncClient) {
        match self.0.iter_mut().find(|c| c.client_id == mapping.client_id) {
            Some(existing) => *existing = mapping,
            None => self.0.push(mapping),
        }
    }

    pub fn get(&self, client_id: ClientId) -> Option<&SyncClient> {
        self.0.iter().find(|c| c.client_id == client_id)
    }

    pub fn remote_id_for(&self, client_id: ClientId) -> Option<&str> {
        self.get(client_id).map(|c| c.remote_item_id.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncClient> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<SyncClient>> for SyncClients {
    fn from(mappings: Vec<SyncClient>) -> Self {
        let mut clients = SyncClients::new();
        for mapping in mappings {
            clients.upsert(mapping);
        }
        clients
    }
}

impl From<SyncClients> for Vec<SyncClient> {
    fn from(clients: SyncClients) -> Self {
        clients.0
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Payload carried by a [`MediaEntity`]
pub trait MediaData:
    Clone + fmt::Debug + PartialEq + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: MediaKind;
}

/// Canonical local record of a media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEntity<T> {
    /// Local identifier, `None` until first persisted
    pub id: Option<MediaId>,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    pub release_year: Option<i32>,
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sync_clients: SyncClients,
    #[serde(default)]
    pub external_ids: ExternalIds,
    pub data: T,
    /// Optimistic concurrency counter, assigned by the store
    #[serde(default)]
    pub version: i64,
}

impl<T: MediaData> MediaEntity<T> {
    pub fn new(title: impl Into<String>, data: T) -> Self {
        Self {
            id: None,
            title: title.into(),
            release_date: None,
            release_year: None,
            overview: None,
            genres: Vec::new(),
            tags: Vec::new(),
            sync_clients: SyncClients::new(),
            external_ids: ExternalIds::new(),
            data,
            version: 0,
        }
    }

    /// Build an entity as reported by a remote client, already mapped onto it.
    pub fn from_remote(
        client_id: ClientId,
        client_kind: ClientKind,
        remote_item_id: impl Into<String>,
        title: impl Into<String>,
        data: T,
    ) -> Self {
        let mut entity = Self::new(title, data);
        entity
            .sync_clients
            .upsert(SyncClient::new(client_id, client_kind, remote_item_id));
        entity
    }

    pub fn with_release_year(mut self, year: i32) -> Self {
        self.release_year = Some(year);
        self
    }

    pub fn with_release_date(mut self, date: NaiveDate) -> Self {
        self.release_date = Some(date);
        self
    }

    pub fn with_overview(mut self, overview: impl Into<String>) -> Self {
        self.overview = Some(overview.into());
        self
    }

    pub fn with_genres<I, S>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genres = genres.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_external_id(mut self, source: ExternalSource, value: impl Into<String>) -> Self {
        self.external_ids.insert(ExternalId::new(source, value));
        self
    }

    pub fn kind(&self) -> MediaKind {
        T::KIND
    }

    pub fn remote_id(&self, client_id: ClientId) -> Option<&str> {
        self.sync_clients.remote_id_for(client_id)
    }

    /// Release year, falling back to the year of the release date.
    pub fn year(&self) -> Option<i32> {
        self.release_year
            .or_else(|| self.release_date.map(|date| date.year()))
    }

    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title cannot be empty".to_string());
        }
        if let Some(year) = self.release_year {
            if !(1800..=3000).contains(&year) {
                return Err(format!("Release year out of range: {}", year));
            }
        }
        Ok(())
    }
}

/// Normalize a title for heuristic comparison: lowercase alphanumerics
/// separated by single spaces.
pub fn normalize_title(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Movie {
    pub runtime_minutes: Option<u32>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub studios: Vec<String>,
    pub content_rating: Option<String>,
}

impl MediaData for Movie {
    const KIND: MediaKind = MediaKind::Movie;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Season {
    pub number: u32,
    pub title: Option<String>,
    pub episode_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Series {
    /// Airing status as reported by the client ("continuing", "ended", ...)
    pub status: Option<String>,
    pub network: Option<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub seasons: Vec<Season>,
}

impl MediaData for Series {
    const KIND: MediaKind = MediaKind::Series;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Track {
    pub artist_name: Option<String>,
    pub album_title: Option<String>,
    pub duration_ms: Option<u64>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
}

impl MediaData for Track {
    const KIND: MediaKind = MediaKind::Track;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlbumTrack {
    pub number: Option<u32>,
    pub title: String,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Album {
    pub artist_name: Option<String>,
    #[serde(default)]
    pub tracks: Vec<AlbumTrack>,
}

impl MediaData for Album {
    const KIND: MediaKind = MediaKind::Album;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Artist {
    pub biography: Option<String>,
    #[serde(default)]
    pub album_titles: Vec<String>,
}

impl MediaData for Artist {
    const KIND: MediaKind = MediaKind::Artist;
}

// =============================================================================
// Lists
// =============================================================================

/// Kind of change applied to a list item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListChange {
    Added,
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change: ListChange,
    pub changed_at: DateTime<Utc>,
    /// Client the change was observed on, if any
    pub client_id: Option<ClientId>,
}

/// Reference from a list to a local media entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub item_id: MediaId,
    pub position: u32,
    pub last_changed: DateTime<Utc>,
    #[serde(default)]
    pub change_history: Vec<ChangeRecord>,
}

/// Sync bookkeeping of a list on one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSyncState {
    pub client_id: ClientId,
    pub remote_list_id: String,
    #[serde(default)]
    pub remote_item_ids: Vec<String>,
    pub last_synced_at: DateTime<Utc>,
}

/// Per-client list sync states, at most one per `ClientId`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ListSyncState>", into = "Vec<ListSyncState>")]
pub struct ListSyncStates(Vec<ListSyncState>);

impl ListSyncStates {
    pub fn upsert(&mut self, state: ListSyncState) {
        match self.0.iter_mut().find(|s| s.client_id == state.client_id) {
            Some(existing) => *existing = state,
            None => self.0.push(state),
        }
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ListSyncState> {
        self.0.iter().find(|s| s.client_id == client_id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ListSyncState> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ListSyncState>> for ListSyncStates {
    fn from(states: Vec<ListSyncState>) -> Self {
        let mut merged = ListSyncStates::default();
        for state in states {
            merged.upsert(state);
        }
        merged
    }
}

impl From<ListSyncStates> for Vec<ListSyncState> {
    fn from(states: ListSyncStates) -> Self {
        states.0
    }
}

/// Ordered item collection shared by playlists and collections
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListData {
    #[serde(default)]
    pub items: Vec<ListItem>,
    #[serde(default)]
    pub sync_states: ListSyncStates,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub owner_user_id: Option<UserId>,
}

impl ListData {
    pub fn contains(&self, item_id: MediaId) -> bool {
        self.items.iter().any(|item| item.item_id == item_id)
    }

    /// Append an item at the end of the list; returns `false` if already present.
    pub fn push_item(
        &mut self,
        item_id: MediaId,
        at: DateTime<Utc>,
        client_id: Option<ClientId>,
    ) -> bool {
        if self.contains(item_id) {
            return false;
        }
        self.items.push(ListItem {
            item_id,
            position: self.items.len() as u32,
            last_changed: at,
            change_history: vec![ChangeRecord {
                change: ListChange::Added,
                changed_at: at,
                client_id,
            }],
        });
        true
    }

    pub fn item_ids(&self) -> Vec<MediaId> {
        self.items.iter().map(|item| item.item_id).collect()
    }
}

/// Payload that wraps a [`ListData`]
pub trait ListPayload: MediaData {
    fn list(&self) -> &ListData;
    fn list_mut(&mut self) -> &mut ListData;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Playlist {
    pub list: ListData,
}

impl MediaData for Playlist {
    const KIND: MediaKind = MediaKind::Playlist;
}

impl ListPayload for Playlist {
    fn list(&self) -> &ListData {
        &self.list
    }

    fn list_mut(&mut self) -> &mut ListData {
        &mut self.list
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Collection {
    pub list: ListData,
    /// Client-defined collection flavour ("boxset", "franchise", ...)
    pub collection_type: Option<String>,
}

impl MediaData for Collection {
    const KIND: MediaKind = MediaKind::Collection;
}

impl ListPayload for Collection {
    fn list(&self) -> &ListData {
        &self.list
    }

    fn list_mut(&mut self) -> &mut ListData {
        &mut self.list
    }
}

/// Entity whose payload is an ordered list
pub type ListEntity<L> = MediaEntity<L>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Dune: Part  One "), "dune part one");
        assert_eq!(normalize_title("AMÉLIE"), "amélie");
        assert_eq!(normalize_title("!!!"), "");
    }

    #[test]
    fn test_sync_clients_upsert_in_place() {
        let mut clients = SyncClients::new();
        clients.upsert(SyncClient::new(ClientId(1), ClientKind::Plex, "a"));
        clients.upsert(SyncClient::new(ClientId(2), ClientKind::Emby, "b"));
        clients.upsert(SyncClient::new(ClientId(1), ClientKind::Plex, "c"));

        assert_eq!(clients.len(), 2);
        assert_eq!(clients.remote_id_for(ClientId(1)), Some("c"));
        assert_eq!(clients.iter().next().map(|c| c.client_id), Some(ClientId(1)));
    }

    #[test]
    fn test_sync_clients_deserialize_deduplicates() {
        let json = r#"[
            {"client_id": 1, "client_kind": "plex", "remote_item_id": "a", "status": "synced"},
            {"client_id": 1, "client_kind": "plex", "remote_item_id": "b", "status": "pending"}
        ]"#;
        let clients: SyncClients = serde_json::from_str(json).unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.get(ClientId(1)).unwrap().status, ItemSyncStatus::Pending);
    }

    #[test]
    fn test_external_ids_union() {
        let mut a: ExternalIds = vec![ExternalId::new(ExternalSource::Tmdb, "1")]
            .into_iter()
            .collect();
        let b: ExternalIds = vec![
            ExternalId::new(ExternalSource::Tmdb, "1"),
            ExternalId::new(ExternalSource::Imdb, "tt1"),
        ]
        .into_iter()
        .collect();

        a.union(&b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_entity_year_falls_back_to_date() {
        let date = NaiveDate::from_ymd_opt(2021, 10, 22).unwrap();
        let movie = MediaEntity::new("Dune", Movie::default()).with_release_date(date);
        assert_eq!(movie.year(), Some(2021));
        assert_eq!(movie.kind(), MediaKind::Movie);
    }

    #[test]
    fn test_entity_validation() {
        let movie = MediaEntity::new("  ", Movie::default());
        assert!(movie.validate().is_err());

        let movie = MediaEntity::new("Dune", Movie::default()).with_release_year(20);
        assert!(movie.validate().is_err());
    }

    #[test]
    fn test_list_push_item_assigns_positions() {
        let mut list = ListData::default();
        let now = Utc::now();
        assert!(list.push_item(MediaId(10), now, None));
        assert!(list.push_item(MediaId(11), now, Some(ClientId(1))));
        assert!(!list.push_item(MediaId(10), now, None));

        assert_eq!(list.item_ids(), vec![MediaId(10), MediaId(11)]);
        assert_eq!(list.items[1].position, 1);
        assert_eq!(list.items[1].change_history[0].change, ListChange::Added);
    }

    #[test]
    fn test_kind_round_trip_strings() {
        for kind in MediaKind::CATALOG.iter().chain(MediaKind::LISTS.iter()) {
            assert_eq!(kind.as_str().parse::<MediaKind>().unwrap(), *kind);
        }
        assert!("podcast".parse::<MediaKind>().is_err());
        assert_eq!("musicbrainz".parse::<ExternalSource>().unwrap(), ExternalSource::MusicBrainz);
    }
}
