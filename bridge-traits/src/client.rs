//! Remote client handle
//!
//! A [`ClientHandle`] bundles the adapters a registered client provides. Its
//! [`Capabilities`] are derived from the adapters present at construction and
//! the typed accessors return `None` for anything the client cannot do.

use core_library::{
    Album, Artist, ClientId, ClientKind, Collection, ListPayload, MediaData, MediaEntity, Movie,
    Playlist, Series, Track,
};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::capability::{Capabilities, Capability};
use crate::error::{BridgeError, Result};
use crate::providers::{ListProvider, MovieProvider, MusicProvider, SeriesProvider};
use crate::query::MediaQuery;

#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    kind: ClientKind,
    name: String,
    capabilities: Capabilities,
    movies: Option<Arc<dyn MovieProvider>>,
    series: Option<Arc<dyn SeriesProvider>>,
    music: Option<Arc<dyn MusicProvider>>,
    playlists: Option<Arc<dyn ListProvider<Playlist>>>,
    collections: Option<Arc<dyn ListProvider<Collection>>>,
}

impl ClientHandle {
    pub fn builder(id: ClientId, kind: ClientKind) -> ClientHandleBuilder {
        ClientHandleBuilder {
            id,
            kind,
            name: None,
            movies: None,
            series: None,
            music: None,
            playlists: None,
            collections: None,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn movies(&self) -> Option<&dyn MovieProvider> {
        self.movies.as_deref()
    }

    pub fn series(&self) -> Option<&dyn SeriesProvider> {
        self.series.as_deref()
    }

    pub fn music(&self) -> Option<&dyn MusicProvider> {
        self.music.as_deref()
    }

    pub fn playlists(&self) -> Option<&dyn ListProvider<Playlist>> {
        self.playlists.as_deref()
    }

    pub fn collections(&self) -> Option<&dyn ListProvider<Collection>> {
        self.collections.as_deref()
    }

    /// Error describing a missing capability on this client
    pub fn unsupported(&self, capability: Capability) -> BridgeError {
        BridgeError::NotSupported {
            client_id: self.id.0,
            capability: capability.to_string(),
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities.iter().collect::<Vec<_>>())
            .finish()
    }
}

pub struct ClientHandleBuilder {
    id: ClientId,
    kind: ClientKind,
    name: Option<String>,
    movies: Option<Arc<dyn MovieProvider>>,
    series: Option<Arc<dyn SeriesProvider>>,
    music: Option<Arc<dyn MusicProvider>>,
    playlists: Option<Arc<dyn ListProvider<Playlist>>>,
    collections: Option<Arc<dyn ListProvider<Collection>>>,
}

impl ClientHandleBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn movies(mut self, provider: Arc<dyn MovieProvider>) -> Self {
        self.movies = Some(provider);
        self
    }

    pub fn series(mut self, provider: Arc<dyn SeriesProvider>) -> Self {
        self.series = Some(provider);
        self
    }

    pub fn music(mut self, provider: Arc<dyn MusicProvider>) -> Self {
        self.music = Some(provider);
        self
    }

    pub fn playlists(mut self, provider: Arc<dyn ListProvider<Playlist>>) -> Self {
        self.playlists = Some(provider);
        self
    }

    pub fn collections(mut self, provider: Arc<dyn ListProvider<Collection>>) -> Self {
        self.collections = Some(provider);
        self
    }

    pub fn build(self) -> ClientHandle {
        let mut capabilities = Capabilities::empty();
        if self.movies.is_some() {
            capabilities.insert(Capability::Movies);
        }
        if self.series.is_some() {
            capabilities.insert(Capability::Series);
        }
        if self.music.is_some() {
            capabilities.insert(Capability::Tracks);
            capabilities.insert(Capability::Albums);
            capabilities.insert(Capability::Artists);
        }
        if self.playlists.is_some() {
            capabilities.insert(Capability::Playlists);
        }
        if self.collections.is_some() {
            capabilities.insert(Capability::Collections);
        }

        ClientHandle {
            name: self
                .name
                .unwrap_or_else(|| format!("{}-{}", self.kind, self.id)),
            id: self.id,
            kind: self.kind,
            capabilities,
            movies: self.movies,
            series: self.series,
            music: self.music,
            playlists: self.playlists,
            collections: self.collections,
        }
    }
}

// =============================================================================
// Typed dispatch
// =============================================================================

/// Payload that can be fetched page by page from a client's adapter
pub trait RemoteMedia: MediaData {
    const CAPABILITY: Capability;

    /// Fetch entities through the matching adapter, or fail with
    /// `NotSupported` if the client lacks it.
    fn fetch<'a>(
        client: &'a ClientHandle,
        query: &'a MediaQuery,
    ) -> BoxFuture<'a, Result<Vec<MediaEntity<Self>>>>;
}

impl RemoteMedia for Movie {
    const CAPABILITY: Capability = Capability::Movies;

    fn fetch<'a>(
        client: &'a ClientHandle,
        query: &'a MediaQuery,
    ) -> BoxFuture<'a, Result<Vec<MediaEntity<Self>>>> {
        Box::pin(async move {
            let provider = client
                .movies()
                .ok_or_else(|| client.unsupported(Self::CAPABILITY))?;
            provider.get_movies(query).await
        })
    }
}

impl RemoteMedia for Series {
    const CAPABILITY: Capability = Capability::Series;

    fn fetch<'a>(
        client: &'a ClientHandle,
        query: &'a MediaQuery,
    ) -> BoxFuture<'a, Result<Vec<MediaEntity<Self>>>> {
        Box::pin(async move {
            let provider = client
                .series()
                .ok_or_else(|| client.unsupported(Self::CAPABILITY))?;
            provider.get_series(query).await
        })
    }
}

impl RemoteMedia for Track {
    const CAPABILITY: Capability = Capability::Tracks;

    fn fetch<'a>(
        client: &'a ClientHandle,
        query: &'a MediaQuery,
    ) -> BoxFuture<'a, Result<Vec<MediaEntity<Self>>>> {
        Box::pin(async move {
            let provider = client
                .music()
                .ok_or_else(|| client.unsupported(Self::CAPABILITY))?;
            provider.get_tracks(query).await
        })
    }
}

impl RemoteMedia for Album {
    const CAPABILITY: Capability = Capability::Albums;

    fn fetch<'a>(
        client: &'a ClientHandle,
        query: &'a MediaQuery,
    ) -> BoxFuture<'a, Result<Vec<MediaEntity<Self>>>> {
        Box::pin(async move {
            let provider = client
                .music()
                .ok_or_else(|| client.unsupported(Self::CAPABILITY))?;
            provider.get_albums(query).await
        })
    }
}

impl RemoteMedia for Artist {
    const CAPABILITY: Capability = Capability::Artists;

    fn fetch<'a>(
        client: &'a ClientHandle,
        query: &'a MediaQuery,
    ) -> BoxFuture<'a, Result<Vec<MediaEntity<Self>>>> {
        Box::pin(async move {
            let provider = client
                .music()
                .ok_or_else(|| client.unsupported(Self::CAPABILITY))?;
            provider.get_artists(query).await
        })
    }
}

/// List payload with a list adapter on the client
pub trait RemoteList: ListPayload {
    const CAPABILITY: Capability;

    fn provider(client: &ClientHandle) -> Option<&dyn ListProvider<Self>>;
}

impl RemoteList for Playlist {
    const CAPABILITY: Capability = Capability::Playlists;

    fn provider(client: &ClientHandle) -> Option<&dyn ListProvider<Self>> {
        client.playlists()
    }
}

impl RemoteList for Collection {
    const CAPABILITY: Capability = Capability::Collections;

    fn provider(client: &ClientHandle) -> Option<&dyn ListProvider<Self>> {
        client.collections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryProvider;

    #[test]
    fn test_capabilities_derived_from_adapters() {
        let provider = Arc::new(InMemoryProvider::new(ClientId(1), ClientKind::Jellyfin));
        let client = ClientHandle::builder(ClientId(1), ClientKind::Jellyfin)
            .movies(provider.clone())
            .music(provider)
            .build();

        assert!(client.supports(Capability::Movies));
        assert!(client.supports(Capability::Albums));
        assert!(!client.supports(Capability::Playlists));
        assert!(client.playlists().is_none());
        assert_eq!(client.name(), "jellyfin-1");
    }

    #[tokio::test]
    async fn test_fetch_without_adapter_is_not_supported() {
        let client = ClientHandle::builder(ClientId(4), ClientKind::Radarr).build();
        let result = Series::fetch(&client, &MediaQuery::new()).await;

        assert_eq!(
            result.unwrap_err(),
            BridgeError::NotSupported {
                client_id: 4,
                capability: "series".to_string()
            }
        );
    }
}
