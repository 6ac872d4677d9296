//! # Merge Engine
//!
//! Combines the stored state of an entity with a remote snapshot of it.
//!
//! ## Rules
//!
//! - Scalars take the incoming value only when it is non-empty (or non-zero).
//! - String collections are unioned case-insensitively; the first spelling
//!   seen is kept.
//! - `sync_clients` are upserted by client, `external_ids` unioned.
//! - Payload substructures (seasons, album tracks, list items) fill gaps and
//!   never drop existing entries.
//! - Local identity (`id`, `version`) always comes from the existing entity.
//!
//! Merging is pure and idempotent: merging the same snapshot a second time
//! returns an equal entity, which lets callers skip the write.

use core_library::{
    Album, AlbumTrack, Artist, Collection, ListData, MediaData, MediaEntity, Movie, Playlist,
    Season, Series, Track,
};

/// Payload-specific half of [`merge`]
pub trait MergePayload: MediaData {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self;
}

/// Merge `incoming` into `existing`.
pub fn merge<T: MergePayload>(
    existing: &MediaEntity<T>,
    incoming: &MediaEntity<T>,
) -> MediaEntity<T> {
    let mut sync_clients = existing.sync_clients.clone();
    for mapping in incoming.sync_clients.iter() {
        sync_clients.upsert(mapping.clone());
    }

    let mut external_ids = existing.external_ids.clone();
    external_ids.union(&incoming.external_ids);

    MediaEntity {
        id: existing.id,
        title: if incoming.title.trim().is_empty() {
            existing.title.clone()
        } else {
            incoming.title.clone()
        },
        release_date: fill(&existing.release_date, &incoming.release_date),
        release_year: incoming
            .release_year
            .filter(|year| *year != 0)
            .or(existing.release_year),
        overview: fill_text(&existing.overview, &incoming.overview),
        genres: union_strings(&existing.genres, &incoming.genres),
        tags: union_strings(&existing.tags, &incoming.tags),
        sync_clients,
        external_ids,
        data: T::merge_payload(&existing.data, &incoming.data),
        version: existing.version,
    }
}

// ============================================================================
// Field helpers
// ============================================================================

fn fill<T: Clone>(existing: &Option<T>, incoming: &Option<T>) -> Option<T> {
    incoming.clone().or_else(|| existing.clone())
}

fn fill_text(existing: &Option<String>, incoming: &Option<String>) -> Option<String> {
    match incoming {
        Some(value) if !value.trim().is_empty() => Some(value.clone()),
        _ => existing.clone(),
    }
}

fn fill_number<N: Copy + PartialEq + Default>(existing: Option<N>, incoming: Option<N>) -> Option<N> {
    incoming.filter(|n| *n != N::default()).or(existing)
}

fn union_strings(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    for value in incoming {
        if value.trim().is_empty() {
            continue;
        }
        let lowered = value.to_lowercase();
        if !merged.iter().any(|v| v.to_lowercase() == lowered) {
            merged.push(value.clone());
        }
    }
    merged
}

// ============================================================================
// Payloads
// ============================================================================

impl MergePayload for Movie {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self {
        Movie {
            runtime_minutes: fill_number(existing.runtime_minutes, incoming.runtime_minutes),
            cast: union_strings(&existing.cast, &incoming.cast),
            studios: union_strings(&existing.studios, &incoming.studios),
            content_rating: fill_text(&existing.content_rating, &incoming.content_rating),
        }
    }
}

impl MergePayload for Series {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self {
        let mut seasons = existing.seasons.clone();
        for season in &incoming.seasons {
            match seasons.iter_mut().find(|s| s.number == season.number) {
                Some(current) => {
                    *current = Season {
                        number: current.number,
                        title: fill_text(&current.title, &season.title),
                        episode_count: fill_number(current.episode_count, season.episode_count),
                    }
                }
                None => seasons.push(season.clone()),
            }
        }
        seasons.sort_by_key(|s| s.number);

        Series {
            status: fill_text(&existing.status, &incoming.status),
            network: fill_text(&existing.network, &incoming.network),
            cast: union_strings(&existing.cast, &incoming.cast),
            seasons,
        }
    }
}

impl MergePayload for Track {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self {
        Track {
            artist_name: fill_text(&existing.artist_name, &incoming.artist_name),
            album_title: fill_text(&existing.album_title, &incoming.album_title),
            duration_ms: fill_number(existing.duration_ms, incoming.duration_ms),
            track_number: fill_number(existing.track_number, incoming.track_number),
            disc_number: fill_number(existing.disc_number, incoming.disc_number),
        }
    }
}

fn same_album_track(a: &AlbumTrack, b: &AlbumTrack) -> bool {
    match (a.number, b.number) {
        (Some(x), Some(y)) => x == y,
        _ => core_library::normalize_title(&a.title) == core_library::normalize_title(&b.title),
    }
}

impl MergePayload for Album {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self {
        let mut tracks = existing.tracks.clone();
        for track in &incoming.tracks {
            match tracks.iter_mut().find(|t| same_album_track(t, track)) {
                Some(current) => {
                    *current = AlbumTrack {
                        number: fill_number(current.number, track.number),
                        title: if track.title.trim().is_empty() {
                            current.title.clone()
                        } else {
                            track.title.clone()
                        },
                        duration_ms: fill_number(current.duration_ms, track.duration_ms),
                    }
                }
                None => tracks.push(track.clone()),
            }
        }

        Album {
            artist_name: fill_text(&existing.artist_name, &incoming.artist_name),
            tracks,
        }
    }
}

impl MergePayload for Artist {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self {
        Artist {
            biography: fill_text(&existing.biography, &incoming.biography),
            album_titles: union_strings(&existing.album_titles, &incoming.album_titles),
        }
    }
}

/// Union of list items by item ID, existing order first, positions renumbered.
pub fn merge_list(existing: &ListData, incoming: &ListData) -> ListData {
    let mut items = existing.items.clone();
    for item in &incoming.items {
        if !items.iter().any(|i| i.item_id == item.item_id) {
            items.push(item.clone());
        }
    }
    for (position, item) in items.iter_mut().enumerate() {
        item.position = position as u32;
    }

    let mut sync_states = existing.sync_states.clone();
    for state in incoming.sync_states.iter() {
        sync_states.upsert(state.clone());
    }

    ListData {
        items,
        sync_states,
        last_modified_at: existing.last_modified_at.max(incoming.last_modified_at),
        owner_user_id: existing.owner_user_id.or(incoming.owner_user_id),
    }
}

impl MergePayload for Playlist {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self {
        Playlist {
            list: merge_list(&existing.list, &incoming.list),
        }
    }
}

impl MergePayload for Collection {
    fn merge_payload(existing: &Self, incoming: &Self) -> Self {
        Collection {
            list: merge_list(&existing.list, &incoming.list),
            collection_type: fill_text(&existing.collection_type, &incoming.collection_type),
        }
    }
}
