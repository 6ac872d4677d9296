//! # List Sync Engine
//!
//! Propagates playlists and collections between the clients of one user.
//!
//! ## Per list
//!
//! 1. **Discover**: lists on source and target are matched by exact title
//! 2. **Create or reuse**: the target list is created when missing
//! 3. **Reconcile items**: each source item is translated to the target's
//!    item ID through the local entity mapped on both clients; unmapped
//!    items are skipped
//! 4. **Apply**: missing items are appended to the target in source order;
//!    nothing is ever removed or re-added
//! 5. **Record**: the local list entity gets the target mapping and the
//!    target's sync state
//!
//! ## Per user
//!
//! [`ListSyncEngine::sync_user_lists`] asks the [`ConflictResolver`] for a
//! pair plan over the user's capable clients and runs each pair in order.
//! A failing list or pair is counted and the next one continues.

use crate::batch::{ProgressRange, ProgressSink};
use crate::config::SyncConfig;
use crate::conflict_resolver::{ConflictResolver, ListVersion, PairPlan, Side};
use crate::remote::RemoteCallPolicy;
use crate::users::ListSyncPreferences;
use crate::{Result, SyncError};
use bridge_traits::{Clock, ClientHandle, ItemRef, MediaQuery, RemoteList};
use core_library::{
    ClientId, Collection, ListPayload, ListSyncState, MediaEntity, MediaId, MediaKind,
    MediaStore, Playlist, SyncClient, UserId,
};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Counters of a list sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSyncStats {
    /// Lists created on a target client
    pub lists_created: u64,
    pub lists_synced: u64,
    pub lists_failed: u64,
    /// Client pairs that could not be read at all
    pub pairs_failed: u64,
    pub items_added: u64,
    /// Source items with no mapping on the target client
    pub items_skipped: u64,
    pub items_failed: u64,
}

impl ListSyncStats {
    pub fn absorb(&mut self, other: ListSyncStats) {
        self.lists_created += other.lists_created;
        self.lists_synced += other.lists_synced;
        self.lists_failed += other.lists_failed;
        self.pairs_failed += other.pairs_failed;
        self.items_added += other.items_added;
        self.items_skipped += other.items_skipped;
        self.items_failed += other.items_failed;
    }

    pub fn failed(&self) -> u64 {
        self.lists_failed + self.pairs_failed + self.items_failed
    }
}

#[derive(Clone)]
pub struct ListSyncEngine {
    store: MediaStore,
    policy: RemoteCallPolicy,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
}

impl ListSyncEngine {
    pub fn new(
        store: MediaStore,
        config: &SyncConfig,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            policy: RemoteCallPolicy::from_config(config),
            clock,
            event_bus,
        }
    }

    /// Sync every list of `kind` across `clients`, given in listing order.
    /// With `focus`, only pairs involving that client run.
    pub async fn sync_list_kind(
        &self,
        kind: MediaKind,
        clients: &[ClientHandle],
        preferences: &ListSyncPreferences,
        owner: UserId,
        focus: Option<ClientId>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ListSyncStats> {
        match kind {
            MediaKind::Playlist => {
                self.sync_user_lists::<Playlist>(clients, preferences, owner, focus, progress, cancel)
                    .await
            }
            MediaKind::Collection => {
                self.sync_user_lists::<Collection>(
                    clients,
                    preferences,
                    owner,
                    focus,
                    progress,
                    cancel,
                )
                .await
            }
            other => Err(SyncError::Configuration(format!(
                "{} is catalog media, not a list",
                other
            ))),
        }
    }

    #[instrument(skip_all, fields(kind = %L::KIND, owner = %owner, direction = %preferences.direction))]
    pub async fn sync_user_lists<L: RemoteList>(
        &self,
        clients: &[ClientHandle],
        preferences: &ListSyncPreferences,
        owner: UserId,
        focus: Option<ClientId>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ListSyncStats> {
        let capable: Vec<&ClientHandle> = clients
            .iter()
            .filter(|client| {
                let supported = client.supports(L::CAPABILITY);
                if !supported {
                    debug!(client_id = %client.id(), "Client has no {} adapter, skipping", L::KIND);
                }
                supported
            })
            .collect();
        let ids: Vec<ClientId> = capable.iter().map(|c| c.id()).collect();

        let resolver = ConflictResolver::new(preferences.direction, preferences.primary_client);
        let mut plan = resolver.plan(&ids)?;
        if let Some(focus) = focus {
            plan.retain(|pair| pair.involves(focus));
        }

        let handle = |id: ClientId| {
            capable
                .iter()
                .copied()
                .find(|c| c.id() == id)
                .ok_or_else(|| SyncError::Configuration(format!("client {} is not registered", id)))
        };

        progress.report(0.0, None).await?;
        let range = ProgressRange::full();
        let mut stats = ListSyncStats::default();

        for (index, pair) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let result = match *pair {
                PairPlan::Directed { source, target } => {
                    self.sync_directed::<L>(handle(source)?, handle(target)?, owner, cancel)
                        .await
                }
                PairPlan::Compare { left, right } => {
                    self.sync_compared::<L>(
                        handle(left)?,
                        handle(right)?,
                        &resolver,
                        owner,
                        cancel,
                    )
                    .await
                }
            };

            match result {
                Ok(pair_stats) => stats.absorb(pair_stats),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    warn!(pair = ?pair, error = %e, "List sync failed for client pair");
                    stats.pairs_failed += 1;
                }
            }

            progress
                .report(
                    range.at(index + 1, plan.len()),
                    Some(format!("Synced {} of {} client pairs", index + 1, plan.len())),
                )
                .await?;
        }

        if plan.is_empty() {
            progress.report(range.upper, None).await?;
        }

        info!(
            pairs = plan.len(),
            created = stats.lists_created,
            synced = stats.lists_synced,
            items_added = stats.items_added,
            items_skipped = stats.items_skipped,
            failed = stats.failed(),
            "List sync finished"
        );
        Ok(stats)
    }

    /// Push every list of `source` to `target`.
    pub async fn sync_directed<L: RemoteList>(
        &self,
        source: &ClientHandle,
        target: &ClientHandle,
        owner: UserId,
        cancel: &CancellationToken,
    ) -> Result<ListSyncStats> {
        let source_lists = self.fetch_lists::<L>(source, cancel).await?;
        let target_lists = self.fetch_lists::<L>(target, cancel).await?;
        let mut target_index = title_index(&target_lists, target.id());

        let mut stats = ListSyncStats::default();
        for list in &source_lists {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let result = self
                .sync_list(source, target, list, &mut target_index, owner, cancel)
                .await;
            absorb_list_result(&mut stats, &list.title, result)?;
        }
        Ok(stats)
    }

    /// Compare the lists of two clients by title; the most recently modified
    /// copy of each list is pushed to the other side.
    pub async fn sync_compared<L: RemoteList>(
        &self,
        left: &ClientHandle,
        right: &ClientHandle,
        resolver: &ConflictResolver,
        owner: UserId,
        cancel: &CancellationToken,
    ) -> Result<ListSyncStats> {
        let left_lists = self.fetch_lists::<L>(left, cancel).await?;
        let right_lists = self.fetch_lists::<L>(right, cancel).await?;
        let mut left_index = title_index(&left_lists, left.id());
        let mut right_index = title_index(&right_lists, right.id());

        let mut titles: Vec<&str> = Vec::new();
        for list in left_lists.iter().chain(right_lists.iter()) {
            if !titles.contains(&list.title.as_str()) {
                titles.push(&list.title);
            }
        }

        let mut stats = ListSyncStats::default();
        for title in titles {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let on_left = left_lists.iter().find(|l| l.title == title);
            let on_right = right_lists.iter().find(|l| l.title == title);
            let left_version = on_left.map(|l| version(l, left.id()));
            let right_version = on_right.map(|l| version(l, right.id()));

            let result = match (
                resolver.resolve(left_version.as_ref(), right_version.as_ref()),
                on_left,
                on_right,
            ) {
                (Some(Side::Left), Some(list), _) => {
                    self.sync_list(left, right, list, &mut right_index, owner, cancel)
                        .await
                }
                (Some(Side::Right), _, Some(list)) => {
                    self.sync_list(right, left, list, &mut left_index, owner, cancel)
                        .await
                }
                _ => continue,
            };
            absorb_list_result(&mut stats, title, result)?;
        }
        Ok(stats)
    }

    /// Push one list from `source` to `target`.
    ///
    /// `target_index` maps list titles on the target to remote list IDs and
    /// is extended when a list is created.
    #[instrument(skip_all, fields(list = %list.title, source = %source.id(), target = %target.id()))]
    pub async fn sync_list<L: RemoteList>(
        &self,
        source: &ClientHandle,
        target: &ClientHandle,
        list: &MediaEntity<L>,
        target_index: &mut HashMap<String, String>,
        owner: UserId,
        cancel: &CancellationToken,
    ) -> Result<ListSyncStats> {
        let source_provider =
            L::provider(source).ok_or_else(|| source.unsupported(L::CAPABILITY))?;
        let target_provider =
            L::provider(target).ok_or_else(|| target.unsupported(L::CAPABILITY))?;

        if list.title.trim().is_empty() {
            return Err(SyncError::DataIntegrity(format!(
                "{} without a title on client {}",
                L::KIND,
                source.id()
            )));
        }
        let source_list_id = list
            .remote_id(source.id())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SyncError::DataIntegrity(format!(
                    "{} '{}' has no remote list ID for client {}",
                    L::KIND,
                    list.title,
                    source.id()
                ))
            })?
            .to_string();

        let writes = self.policy.without_retries();
        let mut stats = ListSyncStats::default();

        let (target_list_id, mut present) = match target_index.get(&list.title).cloned() {
            Some(id) => {
                let items = self
                    .policy
                    .call("get list items", cancel, || target_provider.get_list_items(&id))
                    .await?;
                let present: HashSet<String> =
                    items.into_iter().map(|item| item.remote_item_id).collect();
                (id, present)
            }
            None => {
                let id = writes
                    .call("create list", cancel, || {
                        target_provider.create_list(&list.title, list.overview.as_deref())
                    })
                    .await?;
                info!(remote_list_id = %id, "Created list on target client");
                target_index.insert(list.title.clone(), id.clone());
                stats.lists_created += 1;
                (id, HashSet::new())
            }
        };

        let mut source_items = self
            .policy
            .call("get list items", cancel, || {
                source_provider.get_list_items(&source_list_id)
            })
            .await?;
        source_items.sort_by_key(|item| item.position);

        let mut synced: Vec<String> = Vec::new();
        for item in &source_items {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let kinds = match &item.kind {
                Some(kind) => std::slice::from_ref(kind),
                None => &MediaKind::CATALOG[..],
            };
            let Some(target_item_id) = self
                .store
                .repository()
                .translate_remote_id(source.id(), &item.remote_item_id, target.id(), kinds)
                .await?
            else {
                debug!(item = %item.remote_item_id, "Item has no mapping on target, skipping");
                stats.items_skipped += 1;
                continue;
            };

            if !present.contains(&target_item_id) {
                match writes
                    .call("add item", cancel, || {
                        target_provider.add_item(&target_list_id, &target_item_id)
                    })
                    .await
                {
                    Ok(()) => {
                        stats.items_added += 1;
                        present.insert(target_item_id.clone());
                    }
                    Err(e) if !e.is_recoverable() => return Err(e),
                    Err(e) => {
                        warn!(item = %target_item_id, error = %e, "Failed to add item to list");
                        stats.items_failed += 1;
                        continue;
                    }
                }
            }

            if !synced.contains(&target_item_id) {
                synced.push(target_item_id);
            }
        }

        let media_id = self
            .record(
                source,
                target,
                list,
                &source_list_id,
                &source_items,
                &target_list_id,
                synced,
                owner,
            )
            .await?;
        stats.lists_synced += 1;

        self.event_bus
            .emit(CoreEvent::Library(LibraryEvent::ListSynced {
                media_id: media_id.0,
                kind: L::KIND.to_string(),
                source_client: source.id().0,
                target_client: target.id().0,
                items_added: stats.items_added,
            }))
            .ok();

        Ok(stats)
    }

    async fn fetch_lists<L: RemoteList>(
        &self,
        client: &ClientHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaEntity<L>>> {
        let provider = L::provider(client).ok_or_else(|| client.unsupported(L::CAPABILITY))?;
        let query = MediaQuery::new().media_kind(L::KIND);
        self.policy
            .call("search lists", cancel, || provider.search_lists(&query))
            .await
    }

    /// Write the outcome of a list push to the local list entity, creating it
    /// from the source list on first sight.
    #[allow(clippy::too_many_arguments)]
    async fn record<L: RemoteList>(
        &self,
        source: &ClientHandle,
        target: &ClientHandle,
        list: &MediaEntity<L>,
        source_list_id: &str,
        source_items: &[ItemRef],
        target_list_id: &str,
        synced: Vec<String>,
        owner: UserId,
    ) -> Result<MediaId> {
        let now = self.clock.now();
        let repository = self.store.repository();
        let source_mapping = SyncClient::new(source.id(), source.kind(), source_list_id);
        let target_mapping = SyncClient::new(target.id(), target.kind(), target_list_id);
        let target_state = ListSyncState {
            client_id: target.id(),
            remote_list_id: target_list_id.to_string(),
            remote_item_ids: synced,
            last_synced_at: now,
        };

        let existing = match repository
            .find_by_remote_id(L::KIND, source.id(), source_list_id)
            .await?
        {
            Some(id) => Some(id),
            None => {
                repository
                    .find_by_remote_id(L::KIND, target.id(), target_list_id)
                    .await?
            }
        };

        if let Some(id) = existing {
            self.store
                .update_with::<L, _>(id, |current| {
                    let mut next = current.clone();
                    next.sync_clients.upsert(source_mapping.clone());
                    next.sync_clients.upsert(target_mapping.clone());
                    next.data.list_mut().sync_states.upsert(target_state.clone());
                    Some(next)
                })
                .await?;
            return Ok(id);
        }

        let mut local_items = Vec::new();
        for item in source_items {
            if let Some(media_id) = self.resolve_local_item(source.id(), &item.remote_item_id).await? {
                local_items.push(media_id);
            }
        }

        let mut entity = MediaEntity::new(list.title.clone(), L::default());
        entity.overview = list.overview.clone();
        entity.sync_clients.upsert(source_mapping);
        entity.sync_clients.upsert(target_mapping);

        let data = entity.data.list_mut();
        data.last_modified_at = list.data.list().last_modified_at;
        data.owner_user_id = Some(owner);
        for media_id in local_items {
            data.push_item(media_id, now, Some(source.id()));
        }
        data.sync_states.upsert(ListSyncState {
            client_id: source.id(),
            remote_list_id: source_list_id.to_string(),
            remote_item_ids: source_items
                .iter()
                .map(|item| item.remote_item_id.clone())
                .collect(),
            last_synced_at: now,
        });
        data.sync_states.upsert(target_state);

        let created = self.store.create(&entity).await?;
        created.id.ok_or_else(|| {
            SyncError::DataIntegrity(format!("{} '{}' was stored without an ID", L::KIND, list.title))
        })
    }

    async fn resolve_local_item(
        &self,
        client_id: ClientId,
        remote_item_id: &str,
    ) -> Result<Option<MediaId>> {
        for kind in MediaKind::CATALOG {
            if let Some(id) = self
                .store
                .repository()
                .find_by_remote_id(kind, client_id, remote_item_id)
                .await?
            {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}

fn version<L: ListPayload>(list: &MediaEntity<L>, client_id: ClientId) -> ListVersion {
    ListVersion {
        client_id,
        last_modified_at: list.data.list().last_modified_at,
    }
}

/// First remote list ID per exact title
fn title_index<L: ListPayload>(lists: &[MediaEntity<L>], client_id: ClientId) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for list in lists {
        if let Some(id) = list.remote_id(client_id) {
            index
                .entry(list.title.clone())
                .or_insert_with(|| id.to_string());
        }
    }
    index
}

fn absorb_list_result(
    stats: &mut ListSyncStats,
    title: &str,
    result: Result<ListSyncStats>,
) -> Result<()> {
    match result {
        Ok(list_stats) => {
            stats.absorb(list_stats);
            Ok(())
        }
        Err(e) if !e.is_recoverable() => Err(e),
        Err(e) => {
            warn!(list = title, error = %e, "List sync failed");
            stats.lists_failed += 1;
            Ok(())
        }
    }
}
