//! # Media Sync Engine
//!
//! Reconciles one catalog kind of one client with the local library.
//!
//! ## Workflow
//!
//! 1. Probe the client for the adapter of the kind
//! 2. Fetch the remote catalog page by page (progress 0-50)
//! 3. Run the items through the [`BatchRunner`] (progress 50-100); for each
//!    item, match it to a local entity and either create it or merge into it
//!
//! ## Failures
//!
//! Integrity errors, remote errors and exhausted version conflicts skip the
//! item and count it as failed. Persistence errors abort the chunk and the
//! unit. Cancellation is checked before every item.

use crate::batch::{BatchRunner, ChunkProcessor, ProgressRange, ProgressSink, SyncStats};
use crate::config::SyncConfig;
use crate::matcher::EntityMatcher;
use crate::merge::{merge, MergePayload};
use crate::remote::RemoteCallPolicy;
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::{ClientHandle, MediaQuery, RemoteMedia};
use core_library::{
    Album, Artist, ClientId, MediaEntity, MediaKind, MediaStore, Movie, Series, Track,
    WriteOutcome,
};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Upper bound of the fetch phase within a unit's progress
const FETCH_PHASE_END: f64 = 50.0;

#[derive(Clone)]
pub struct MediaSyncEngine {
    store: MediaStore,
    matcher: EntityMatcher,
    policy: RemoteCallPolicy,
    runner: BatchRunner,
    page_size: u32,
    event_bus: Arc<EventBus>,
}

enum ItemOutcome {
    Created,
    Updated,
    Unchanged,
}

impl MediaSyncEngine {
    pub fn new(store: MediaStore, config: &SyncConfig, event_bus: Arc<EventBus>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            matcher: EntityMatcher::new(store.repository().clone(), config.trusted_sources.clone()),
            store,
            policy: RemoteCallPolicy::from_config(config),
            runner: BatchRunner::new(config.batch_size)?,
            page_size: config.page_size,
            event_bus,
        })
    }

    /// Sync `kind` from `client`. `scope` lists the clients of the same user,
    /// used for title/year matching.
    pub async fn sync_media_kind(
        &self,
        kind: MediaKind,
        client: &ClientHandle,
        scope: &[ClientId],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<SyncStats> {
        match kind {
            MediaKind::Movie => self.sync_kind::<Movie>(client, scope, progress, cancel).await,
            MediaKind::Series => self.sync_kind::<Series>(client, scope, progress, cancel).await,
            MediaKind::Track => self.sync_kind::<Track>(client, scope, progress, cancel).await,
            MediaKind::Album => self.sync_kind::<Album>(client, scope, progress, cancel).await,
            MediaKind::Artist => self.sync_kind::<Artist>(client, scope, progress, cancel).await,
            MediaKind::Playlist | MediaKind::Collection => Err(SyncError::Configuration(format!(
                "{} is synchronized as a list, not as catalog media",
                kind
            ))),
        }
    }

    #[instrument(skip_all, fields(client_id = %client.id(), kind = %T::KIND))]
    pub async fn sync_kind<T: RemoteMedia + MergePayload>(
        &self,
        client: &ClientHandle,
        scope: &[ClientId],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<SyncStats> {
        if !client.supports(T::CAPABILITY) {
            return Err(client.unsupported(T::CAPABILITY).into());
        }

        progress.report(0.0, None).await?;
        let items = self.fetch_all::<T>(client, cancel).await?;
        progress
            .report(
                FETCH_PHASE_END,
                Some(format!("Fetched {} {} items", items.len(), T::KIND)),
            )
            .await?;

        let processor = MediaChunkProcessor {
            engine: self,
            client,
            scope,
        };
        let outcome = self
            .runner
            .run(
                &items,
                ProgressRange::new(FETCH_PHASE_END, 100.0)?,
                &processor,
                progress,
                cancel,
            )
            .await?;

        info!(
            chunks = outcome.chunks,
            created = outcome.stats.created,
            updated = outcome.stats.updated,
            unchanged = outcome.stats.unchanged,
            failed = outcome.stats.failed,
            "Media sync finished"
        );
        Ok(outcome.stats)
    }

    async fn fetch_all<T: RemoteMedia>(
        &self,
        client: &ClientHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaEntity<T>>> {
        let mut items = Vec::new();
        let mut page_index = 0;
        loop {
            let query = MediaQuery::page(self.page_size, page_index).media_kind(T::KIND);
            let page = self
                .policy
                .call("fetch", cancel, || T::fetch(client, &query))
                .await?;

            let fetched = page.len();
            items.extend(page);
            debug!(page = page_index, fetched, total = items.len(), "Fetched page");

            if fetched < self.page_size as usize {
                break;
            }
            page_index += 1;
        }
        Ok(items)
    }

    async fn reconcile<T: MergePayload>(
        &self,
        client: &ClientHandle,
        scope: &[ClientId],
        remote: &MediaEntity<T>,
    ) -> Result<ItemOutcome> {
        remote.validate().map_err(|message| {
            SyncError::DataIntegrity(format!("{} '{}': {}", T::KIND, remote.title, message))
        })?;

        let Some(found) = self.matcher.find_match(remote, client.id(), scope).await? else {
            let created = self.store.create(remote).await?;
            if let Some(id) = created.id {
                self.event_bus
                    .emit(CoreEvent::Library(LibraryEvent::MediaAdded {
                        media_id: id.0,
                        kind: T::KIND.to_string(),
                        title: created.title.clone(),
                    }))
                    .ok();
            }
            return Ok(ItemOutcome::Created);
        };

        let outcome = self
            .store
            .update_with::<T, _>(found.media_id, |current| {
                let merged = merge(current, remote);
                (merged != *current).then_some(merged)
            })
            .await?;

        match outcome {
            WriteOutcome::Updated(id) => {
                debug!(media_id = %id, tier = ?found.tier, "Merged remote item");
                self.event_bus
                    .emit(CoreEvent::Library(LibraryEvent::MediaUpdated {
                        media_id: id.0,
                        kind: T::KIND.to_string(),
                    }))
                    .ok();
                Ok(ItemOutcome::Updated)
            }
            WriteOutcome::Unchanged(_) => Ok(ItemOutcome::Unchanged),
        }
    }
}

struct MediaChunkProcessor<'a> {
    engine: &'a MediaSyncEngine,
    client: &'a ClientHandle,
    scope: &'a [ClientId],
}

#[async_trait]
impl<'a, T: MergePayload> ChunkProcessor<MediaEntity<T>> for MediaChunkProcessor<'a> {
    async fn process_chunk(
        &self,
        chunk: &[MediaEntity<T>],
        cancel: &CancellationToken,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        for remote in chunk {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match self.engine.reconcile(self.client, self.scope, remote).await {
                Ok(ItemOutcome::Created) => stats.created += 1,
                Ok(ItemOutcome::Updated) => stats.updated += 1,
                Ok(ItemOutcome::Unchanged) => stats.unchanged += 1,
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    warn!(
                        kind = %T::KIND,
                        title = %remote.title,
                        error = %e,
                        "Skipping item"
                    );
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::InMemoryProvider;
    use core_library::db::create_test_pool;
    use core_library::{ClientKind, ExternalSource, SqliteMediaRepository};
    use std::sync::Mutex;

    const PLEX: ClientId = ClientId(1);

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, percent: f64, _message: Option<String>) -> Result<()> {
            self.reports.lock().unwrap().push(percent);
            Ok(())
        }
    }

    async fn setup(config: SyncConfig) -> (MediaSyncEngine, MediaStore) {
        let pool = create_test_pool().await.unwrap();
        let store = MediaStore::new(Arc::new(SqliteMediaRepository::new(pool)));
        let engine =
            MediaSyncEngine::new(store.clone(), &config, Arc::new(EventBus::new(256))).unwrap();
        (engine, store)
    }

    fn movie(remote_id: &str, title: &str, year: i32) -> MediaEntity<Movie> {
        MediaEntity::from_remote(PLEX, ClientKind::Plex, remote_id, title, Movie::default())
            .with_release_year(year)
    }

    #[tokio::test]
    async fn test_first_sync_creates_second_is_unchanged() {
        let (engine, store) = setup(SyncConfig::default().with_batch_size(2)).await;
        let provider = Arc::new(InMemoryProvider::new(PLEX, ClientKind::Plex));
        provider.add_movie(movie("m1", "Dune", 2021));
        provider.add_movie(movie("m2", "Arrival", 2016));
        provider.add_movie(movie("m3", "Heat", 1995));
        let client = provider.handle();
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();

        let stats = engine
            .sync_kind::<Movie>(&client, &[PLEX], &sink, &cancel)
            .await
            .unwrap();
        assert_eq!(stats.created, 3);
        assert_eq!(store.repository().count_by_kind(MediaKind::Movie).await.unwrap(), 3);

        let again = engine
            .sync_kind::<Movie>(&client, &[PLEX], &RecordingSink::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(again.unchanged, 3);
        assert_eq!(again.created + again.updated, 0);

        let reports = sink.reports.lock().unwrap().clone();
        assert_eq!(reports.first(), Some(&0.0));
        assert_eq!(reports.last(), Some(&100.0));
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_same_title_items_on_one_client_stay_separate() {
        let (engine, store) = setup(SyncConfig::default()).await;
        let provider = Arc::new(InMemoryProvider::new(PLEX, ClientKind::Plex));
        provider.add_movie(movie("m1", "Solaris", 2002));
        provider.add_movie(movie("m2", "Solaris", 2002));
        let client = provider.handle();
        let cancel = CancellationToken::new();

        let first = engine
            .sync_kind::<Movie>(&client, &[PLEX], &RecordingSink::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.updated, 0);

        for _ in 0..2 {
            let again = engine
                .sync_kind::<Movie>(&client, &[PLEX], &RecordingSink::default(), &cancel)
                .await
                .unwrap();
            assert_eq!(again.unchanged, 2);
            assert_eq!(again.created + again.updated, 0);
        }

        assert_eq!(store.repository().count_by_kind(MediaKind::Movie).await.unwrap(), 2);
        let m1: MediaEntity<Movie> = store.find_by_remote_id(PLEX, "m1").await.unwrap().unwrap();
        let m2: MediaEntity<Movie> = store.find_by_remote_id(PLEX, "m2").await.unwrap().unwrap();
        assert_ne!(m1.id, m2.id);
    }

    #[tokio::test]
    async fn test_paged_fetch_reads_every_page() {
        let (engine, store) = setup(SyncConfig::default().with_page_size(2)).await;
        let provider = Arc::new(InMemoryProvider::new(PLEX, ClientKind::Plex));
        for i in 0..5 {
            provider.add_movie(movie(&format!("m{}", i), &format!("Movie {}", i), 2000 + i));
        }

        let stats = engine
            .sync_kind::<Movie>(
                &provider.handle(),
                &[PLEX],
                &RecordingSink::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.created, 5);
        assert_eq!(provider.fetch_calls(), 3);
        assert_eq!(store.repository().count_by_kind(MediaKind::Movie).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_invalid_item_skipped_and_counted() {
        let (engine, _store) = setup(SyncConfig::default()).await;
        let provider = Arc::new(InMemoryProvider::new(PLEX, ClientKind::Plex));
        provider.add_movie(movie("m1", "Dune", 2021));
        provider.add_movie(movie("m2", "   ", 2021));
        provider.add_movie(MediaEntity::new("No Mapping", Movie::default()));

        let stats = engine
            .sync_kind::<Movie>(
                &provider.handle(),
                &[PLEX],
                &RecordingSink::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.created, 1);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_second_client_merges_by_external_id() {
        let (engine, store) = setup(SyncConfig::default()).await;
        let plex = Arc::new(InMemoryProvider::new(PLEX, ClientKind::Plex));
        plex.add_movie(movie("p1", "Dune", 2021).with_external_id(ExternalSource::Tmdb, "438631"));

        let emby_id = ClientId(2);
        let emby = Arc::new(InMemoryProvider::new(emby_id, ClientKind::Emby));
        emby.add_movie(
            MediaEntity::from_remote(emby_id, ClientKind::Emby, "e9", "Dune (2021)", Movie::default())
                .with_external_id(ExternalSource::Tmdb, "438631")
                .with_genres(["Science Fiction"]),
        );

        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let scope = [PLEX, emby_id];
        engine.sync_kind::<Movie>(&plex.handle(), &scope, &sink, &cancel).await.unwrap();
        let stats = engine
            .sync_kind::<Movie>(&emby.handle(), &scope, &sink, &cancel)
            .await
            .unwrap();
        assert_eq!(stats.updated, 1);

        let merged: MediaEntity<Movie> = store.find_by_remote_id(emby_id, "e9").await.unwrap().unwrap();
        assert_eq!(merged.remote_id(PLEX), Some("p1"));
        assert_eq!(merged.genres, vec!["Science Fiction".to_string()]);
        assert_eq!(merged.release_year, Some(2021));
    }

    #[tokio::test]
    async fn test_unsupported_kind_reported() {
        let (engine, _store) = setup(SyncConfig::default()).await;
        let client = ClientHandle::builder(ClientId(7), ClientKind::Radarr).build();

        let result = engine
            .sync_kind::<Series>(
                &client,
                &[ClientId(7)],
                &RecordingSink::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(SyncError::UnsupportedCapability { client_id: 7, .. })
        ));

        let list = engine
            .sync_media_kind(
                MediaKind::Playlist,
                &client,
                &[],
                &RecordingSink::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(list, Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_items() {
        let (engine, store) = setup(SyncConfig::default()).await;
        let provider = Arc::new(InMemoryProvider::new(PLEX, ClientKind::Plex));
        provider.add_movie(movie("m1", "Dune", 2021));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine
            .sync_kind::<Movie>(&provider.handle(), &[PLEX], &RecordingSink::default(), &cancel)
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(store.repository().count_by_kind(MediaKind::Movie).await.unwrap(), 0);
    }
}
