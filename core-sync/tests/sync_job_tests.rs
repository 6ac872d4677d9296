//! Integration tests for sync jobs
//!
//! These tests drive the `SyncCoordinator` end to end against in-memory
//! clients and an in-memory SQLite database:
//! - Catalog sync with batched progress
//! - Title/year matching across clients
//! - Playlist sync in bidirectional and primary-to-clients modes
//! - Capability skipping, cancellation, timeouts and lock contention
//! - Persistence failures failing the job

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, ClientHandle, FixedClock, InMemoryProvider, MediaQuery, MemoryList,
    MovieProvider, WriteOp,
};
use chrono::{DateTime, TimeZone, Utc};
use core_library::db::create_test_pool;
use core_library::{
    ClientId, ClientKind, ExternalId, LibraryError, MediaEntity, MediaId, MediaKind,
    MediaRecord, MediaRepository, MediaStore, Movie, Playlist, SqliteMediaRepository,
    SyncClient, UserId,
};
use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
use core_sync::{
    ClientRegistry, JobRepository, JobStatus, SqliteJobRepository, StaticUserDirectory,
    SyncConfig, SyncCoordinator, SyncDirection, SyncUser, UserSyncPreferences,
};
use mockall::mock;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const USER: UserId = UserId(1);
const A: ClientId = ClientId(1);
const B: ClientId = ClientId(2);
const C: ClientId = ClientId(3);

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap()
}

// ============================================================================
// Test Fixtures
// ============================================================================

struct TestEnv {
    pool: SqlitePool,
    store: MediaStore,
    jobs: Arc<dyn JobRepository>,
    registry: Arc<ClientRegistry>,
    users: Arc<StaticUserDirectory>,
    event_bus: Arc<EventBus>,
    clock: Arc<FixedClock>,
}

impl TestEnv {
    async fn new(preferences: UserSyncPreferences) -> Self {
        let pool = create_test_pool().await.unwrap();
        Self {
            store: MediaStore::new(Arc::new(SqliteMediaRepository::new(pool.clone()))),
            jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
            registry: Arc::new(ClientRegistry::new()),
            users: Arc::new(StaticUserDirectory::new(vec![SyncUser::new(USER, preferences)])),
            event_bus: Arc::new(EventBus::new(1024)),
            clock: Arc::new(FixedClock::new(at(30))),
            pool,
        }
    }

    fn coordinator(&self, config: SyncConfig) -> SyncCoordinator {
        self.coordinator_with(config, Arc::new(SqliteMediaRepository::new(self.pool.clone())))
    }

    fn coordinator_with(
        &self,
        config: SyncConfig,
        media_repository: Arc<dyn MediaRepository>,
    ) -> SyncCoordinator {
        SyncCoordinator::new(
            config,
            self.registry.clone(),
            self.users.clone(),
            self.jobs.clone(),
            media_repository,
            self.event_bus.clone(),
            self.clock.clone(),
        )
        .unwrap()
    }

    async fn register(&self, handle: ClientHandle) {
        self.registry.register(USER, handle).await;
    }

    /// Movies 1 and 2, mapped as "a-mN" on A and "b-mN" on B
    async fn seed_shared_movies(&self) {
        for n in 1..=2 {
            let mut movie = MediaEntity::from_remote(
                A,
                ClientKind::Plex,
                format!("a-m{}", n),
                format!("Movie {}", n),
                Movie::default(),
            );
            movie
                .sync_clients
                .upsert(SyncClient::new(B, ClientKind::Emby, format!("b-m{}", n)));
            self.store.create(&movie).await.unwrap();
        }
    }
}

fn playlist_preferences(direction: SyncDirection, primary: Option<ClientId>) -> UserSyncPreferences {
    let mut preferences = UserSyncPreferences::default();
    preferences.playlists.enabled = true;
    preferences.playlists.direction = direction;
    preferences.playlists.primary_client = primary;
    preferences
}

/// Movie provider that blocks until the call is dropped
struct StalledMovies {
    entered: Notify,
}

#[async_trait]
impl MovieProvider for StalledMovies {
    async fn get_movies(
        &self,
        _query: &MediaQuery,
    ) -> bridge_traits::error::Result<Vec<MediaEntity<Movie>>> {
        self.entered.notify_one();
        tokio::time::sleep(Duration::from_secs(600)).await;
        Err(BridgeError::RemoteCall("unreachable".to_string()))
    }
}

fn stalled_client(id: ClientId) -> (ClientHandle, Arc<StalledMovies>) {
    let movies = Arc::new(StalledMovies {
        entered: Notify::new(),
    });
    let handle = ClientHandle::builder(id, ClientKind::Radarr)
        .movies(movies.clone())
        .build();
    (handle, movies)
}

mock! {
    MediaRepo {}

    #[async_trait]
    impl MediaRepository for MediaRepo {
        async fn find_by_id(&self, id: MediaId) -> core_library::Result<Option<MediaRecord>>;
        async fn find_by_remote_id(
            &self,
            kind: MediaKind,
            client_id: ClientId,
            remote_item_id: &str,
        ) -> core_library::Result<Option<MediaId>>;
        async fn find_by_external_ids(
            &self,
            kind: MediaKind,
            ids: &[ExternalId],
            unmapped_on: ClientId,
        ) -> core_library::Result<Option<MediaId>>;
        async fn find_by_title_year(
            &self,
            kind: MediaKind,
            normalized_title: &str,
            year: i32,
            clients: &[ClientId],
            unmapped_on: ClientId,
        ) -> core_library::Result<Vec<MediaId>>;
        async fn insert(&self, record: &MediaRecord) -> core_library::Result<MediaId>;
        async fn update(&self, record: &MediaRecord) -> core_library::Result<i64>;
        async fn translate_remote_id(
            &self,
            from_client: ClientId,
            remote_item_id: &str,
            to_client: ClientId,
            kinds: &[MediaKind],
        ) -> core_library::Result<Option<String>>;
        async fn count_by_kind(&self, kind: MediaKind) -> core_library::Result<i64>;
    }
}

// ============================================================================
// Catalog Sync
// ============================================================================

#[tokio::test]
async fn test_batched_catalog_sync_reports_monotonic_progress() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let plex = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    for n in 0..120 {
        plex.add_movie(
            MediaEntity::from_remote(A, ClientKind::Plex, format!("m{}", n), format!("Movie {}", n), Movie::default())
                .with_release_year(2000 + (n % 20)),
        );
    }
    env.register(plex.handle()).await;
    let mut events = EventStream::new(env.event_bus.subscribe());

    let coordinator = env.coordinator(SyncConfig::default().with_batch_size(50));
    let run = coordinator.sync_client_now(USER, A, MediaKind::Movie).await.unwrap();

    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(run.progress_percent, 100.0);
    assert_eq!(
        env.store.repository().count_by_kind(MediaKind::Movie).await.unwrap(),
        120
    );

    let progress: Vec<f64> = events
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            CoreEvent::Sync(SyncEvent::Progress { percent, .. }) => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 4);
    assert_eq!(progress[0], 50.0);
    assert!((progress[1] - 70.83).abs() < 0.01);
    assert!((progress[2] - 91.67).abs() < 0.01);
    assert_eq!(progress[3], 100.0);
}

#[tokio::test]
async fn test_title_year_match_fills_blank_fields() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let local = env
        .store
        .create(
            &MediaEntity::from_remote(A, ClientKind::Plex, "a-dune", "Dune", Movie::default())
                .with_release_year(2021),
        )
        .await
        .unwrap();

    let plex = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    let emby = Arc::new(InMemoryProvider::new(B, ClientKind::Emby));
    emby.add_movie(
        MediaEntity::from_remote(B, ClientKind::Emby, "b-dune", "Dune", Movie::default())
            .with_release_year(2021)
            .with_overview("A mythic and emotionally charged hero's journey"),
    );
    env.register(plex.handle()).await;
    env.register(emby.handle()).await;

    let run = env
        .coordinator(SyncConfig::default())
        .sync_client_now(USER, B, MediaKind::Movie)
        .await
        .unwrap();
    assert_eq!(run.status, JobStatus::Completed);

    let merged = env
        .store
        .get::<Movie>(local.id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        merged.overview.as_deref(),
        Some("A mythic and emotionally charged hero's journey")
    );
    assert_eq!(merged.remote_id(A), Some("a-dune"));
    assert_eq!(merged.remote_id(B), Some("b-dune"));
    assert_eq!(
        env.store.repository().count_by_kind(MediaKind::Movie).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_persistence_failure_fails_job() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let plex = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    plex.add_movie(MediaEntity::from_remote(A, ClientKind::Plex, "m1", "Heat", Movie::default()));
    env.register(plex.handle()).await;

    let mut repository = MockMediaRepo::new();
    repository
        .expect_find_by_remote_id()
        .returning(|_, _, _| Err(LibraryError::Database(sqlx::Error::PoolTimedOut)));
    repository
        .expect_find_by_external_ids()
        .returning(|_, _, _| Err(LibraryError::Database(sqlx::Error::PoolTimedOut)));
    repository
        .expect_find_by_title_year()
        .returning(|_, _, _, _, _| Err(LibraryError::Database(sqlx::Error::PoolTimedOut)));

    let coordinator = env.coordinator_with(SyncConfig::default(), Arc::new(repository));
    let run = coordinator.run_media_sync_job().await.unwrap();

    assert_eq!(run.status, JobStatus::Failed);
    assert!(run.message.unwrap().contains("Persistence failure"));
    assert!(coordinator.active_jobs().await.is_empty());
}

#[tokio::test]
async fn test_failing_client_fails_job_after_other_clients_sync() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let broken = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    broken.add_movie(MediaEntity::from_remote(A, ClientKind::Plex, "m1", "Heat", Movie::default()));
    broken.fail_reads(true);
    let healthy = Arc::new(InMemoryProvider::new(B, ClientKind::Emby));
    healthy.add_movie(MediaEntity::from_remote(B, ClientKind::Emby, "b1", "Ronin", Movie::default()));
    env.register(ClientHandle::builder(A, ClientKind::Plex).movies(broken.clone()).build())
        .await;
    env.register(ClientHandle::builder(B, ClientKind::Emby).movies(healthy.clone()).build())
        .await;
    let mut events = EventStream::new(env.event_bus.subscribe());

    let run = env
        .coordinator(SyncConfig::default())
        .run_media_sync_job()
        .await
        .unwrap();

    assert_eq!(run.status, JobStatus::Failed);
    let message = run.message.unwrap();
    assert!(message.contains("1 failed"));
    assert!(message.contains("1 created"));
    assert!(message.contains("last error: "));
    assert!(message.contains("Remote call failed: client 1 unavailable"));
    assert!(!message.contains("Remote call failed: Remote call failed"));
    assert_eq!(
        env.store.repository().count_by_kind(MediaKind::Movie).await.unwrap(),
        1
    );

    let configs = env.jobs.get_sync_job_configs_by_user(USER).await.unwrap();
    let stamped = |client: ClientId| {
        configs
            .iter()
            .find(|c| c.client_id == client && c.media_kind == MediaKind::Movie)
            .and_then(|c| c.last_sync_time)
    };
    assert_eq!(stamped(A), None);
    assert_eq!(stamped(B), Some(at(30)));

    assert!(events
        .drain()
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::Failed { .. }))));
}

// ============================================================================
// List Sync
// ============================================================================

#[tokio::test]
async fn test_bidirectional_newer_playlist_updates_other_client() {
    let env = TestEnv::new(playlist_preferences(SyncDirection::Bidirectional, None)).await;
    env.seed_shared_movies().await;

    let a = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    let b = Arc::new(InMemoryProvider::new(B, ClientKind::Emby));
    a.add_list(
        MediaKind::Playlist,
        MemoryList::new("a-fav", "Favorites")
            .with_items(["a-m1"])
            .modified_at(at(0)),
    );
    b.add_list(
        MediaKind::Playlist,
        MemoryList::new("b-fav", "Favorites")
            .with_items(["b-m1", "b-m2"])
            .modified_at(at(5)),
    );
    env.register(a.handle()).await;
    env.register(b.handle()).await;

    let run = env
        .coordinator(SyncConfig::default())
        .run_list_sync_job()
        .await
        .unwrap();
    assert_eq!(run.status, JobStatus::Completed);

    let favorites = a.list(MediaKind::Playlist, "Favorites").unwrap();
    assert_eq!(favorites.items, vec!["a-m1".to_string(), "a-m2".to_string()]);
    assert!(b.writes().is_empty());
}

#[tokio::test]
async fn test_playlist_job_skips_incapable_client() {
    let env = TestEnv::new(playlist_preferences(SyncDirection::Bidirectional, None)).await;
    env.seed_shared_movies().await;

    let a = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    let b = Arc::new(InMemoryProvider::new(B, ClientKind::Emby));
    a.add_list(MediaKind::Playlist, MemoryList::new("a-mix", "Mix").with_items(["a-m2"]));
    env.register(a.handle()).await;
    env.register(b.handle()).await;
    env.register(
        ClientHandle::builder(C, ClientKind::Radarr)
            .movies(Arc::new(InMemoryProvider::new(C, ClientKind::Radarr)))
            .build(),
    )
    .await;

    let run = env
        .coordinator(SyncConfig::default())
        .run_list_sync_job()
        .await
        .unwrap();

    assert_eq!(run.status, JobStatus::Completed);
    assert!(run.message.unwrap().contains("1 skipped"));
    let mix = b.list(MediaKind::Playlist, "Mix").unwrap();
    assert_eq!(mix.items, vec!["b-m2".to_string()]);
}

#[tokio::test]
async fn test_unmapped_item_skipped_and_rest_recorded() {
    let env = TestEnv::new(playlist_preferences(SyncDirection::PrimaryToClients, Some(A))).await;
    env.seed_shared_movies().await;

    let a = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    let b = Arc::new(InMemoryProvider::new(B, ClientKind::Emby));
    a.add_list(
        MediaKind::Playlist,
        MemoryList::new("a-fav", "Favorites").with_items(["a-m1", "a-unknown", "a-m2"]),
    );
    env.register(a.handle()).await;
    env.register(b.handle()).await;

    let run = env
        .coordinator(SyncConfig::default())
        .run_list_sync_job()
        .await
        .unwrap();
    assert_eq!(run.status, JobStatus::Completed);

    let copy = b.list(MediaKind::Playlist, "Favorites").unwrap();
    assert_eq!(copy.items, vec!["b-m1".to_string(), "b-m2".to_string()]);

    let local = env
        .store
        .find_by_remote_id::<Playlist>(A, "a-fav")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.data.list.items.len(), 2);
    let state = local.data.list.sync_states.get(B).unwrap();
    assert_eq!(state.remote_list_id, copy.remote_list_id);
    assert_eq!(state.last_synced_at, at(30));
}

#[tokio::test]
async fn test_primary_to_clients_rerun_changes_nothing() {
    let env = TestEnv::new(playlist_preferences(SyncDirection::PrimaryToClients, Some(A))).await;
    env.seed_shared_movies().await;

    let a = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    let b = Arc::new(InMemoryProvider::new(B, ClientKind::Emby));
    a.add_list(
        MediaKind::Playlist,
        MemoryList::new("a-fav", "Favorites").with_items(["a-m1", "a-m2"]),
    );
    env.register(a.handle()).await;
    env.register(b.handle()).await;
    let coordinator = env.coordinator(SyncConfig::default());

    coordinator.sync_client_now(USER, B, MediaKind::Playlist).await.unwrap();
    let writes = b.writes();
    assert_eq!(writes.len(), 3);
    assert!(matches!(writes[0], WriteOp::CreateList { .. }));

    let run = coordinator
        .sync_client_now(USER, B, MediaKind::Playlist)
        .await
        .unwrap();
    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(b.writes().len(), 3);
    assert!(a.writes().is_empty());
}

// ============================================================================
// Job Control
// ============================================================================

#[tokio::test]
async fn test_cancel_running_job() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let (handle, movies) = stalled_client(A);
    env.register(handle).await;
    let coordinator = env.coordinator(SyncConfig::default());

    let (run, _) = tokio::join!(coordinator.run_media_sync_job(), async {
        movies.entered.notified().await;
        let active = coordinator.active_jobs().await;
        assert_eq!(active.len(), 1);
        coordinator.cancel_job(&active[0]).await.unwrap();
    });

    let run = run.unwrap();
    assert_eq!(run.status, JobStatus::Failed);
    assert_eq!(run.message.as_deref(), Some("Job cancelled"));
    assert!(coordinator.active_jobs().await.is_empty());
}

#[tokio::test]
async fn test_job_timeout_fails_run() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let (handle, _movies) = stalled_client(A);
    env.register(handle).await;

    let coordinator = env.coordinator(
        SyncConfig::default().with_job_timeout(Some(Duration::from_secs(1))),
    );
    let run = coordinator.run_media_sync_job().await.unwrap();

    assert_eq!(run.status, JobStatus::Failed);
    assert_eq!(run.message.as_deref(), Some("Job timed out after 1s"));
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn test_concurrent_run_on_locked_client_is_reported() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let (handle, movies) = stalled_client(A);
    env.register(handle).await;
    let coordinator = env.coordinator(
        SyncConfig::default().with_job_timeout(Some(Duration::from_secs(1))),
    );

    let (first, second) = tokio::join!(coordinator.run_media_sync_job(), async {
        movies.entered.notified().await;
        coordinator.sync_client_now(USER, A, MediaKind::Movie).await
    });

    let second = second.unwrap();
    assert_eq!(second.status, JobStatus::Failed);
    assert!(second.message.unwrap().contains("Sync already in progress"));
    assert_eq!(first.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_run_due_jobs_records_history() {
    let env = TestEnv::new(UserSyncPreferences::default()).await;
    let plex = Arc::new(InMemoryProvider::new(A, ClientKind::Plex));
    plex.add_movie(MediaEntity::from_remote(A, ClientKind::Plex, "m1", "Heat", Movie::default()));
    env.register(plex.handle()).await;
    let coordinator = env.coordinator(SyncConfig::default());

    let runs = coordinator.run_due_jobs().await.unwrap();
    assert_eq!(runs.len(), 2);

    let history = coordinator.recent_job_runs("media.sync", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobStatus::Completed);
    assert_eq!(
        coordinator.get_job_run(&history[0].id).await.unwrap(),
        Some(history[0].clone())
    );
}
