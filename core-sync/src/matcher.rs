//! # Entity Matcher
//!
//! Resolves a remote record to at most one existing local entity.
//!
//! ## Resolution order
//!
//! The first tier that yields a candidate wins; there is no scoring.
//!
//! 1. **Remote ID**: an entity already mapped to the record's remote item ID
//!    on the requesting client.
//! 2. **External ID**: an entity sharing at least one identifier from a
//!    trusted source.
//! 3. **Title and year**: an entity with the same normalized title and release
//!    year, mapped on one of the requesting user's clients.
//!
//! Tiers 2 and 3 never return an entity the requesting client already maps
//! under another remote ID: tier 1 missed, so that entity is a different item
//! on the same client.
//!
//! When a tier yields several candidates the lowest local ID is taken. The
//! outcome reports how many candidates the title/year tier saw so callers can
//! log ambiguous matches.

use crate::{Result, SyncError};
use core_library::{
    ClientId, ExternalId, ExternalSource, MediaData, MediaEntity, MediaId, MediaRepository,
};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    RemoteId,
    ExternalId,
    TitleYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub media_id: MediaId,
    pub tier: MatchTier,
    /// Number of entities the winning tier returned
    pub candidates: usize,
}

impl MatchOutcome {
    pub fn is_ambiguous(&self) -> bool {
        self.candidates > 1
    }
}

#[derive(Clone)]
pub struct EntityMatcher {
    repository: Arc<dyn MediaRepository>,
    trusted_sources: Vec<ExternalSource>,
}

impl EntityMatcher {
    pub fn new(repository: Arc<dyn MediaRepository>, trusted_sources: Vec<ExternalSource>) -> Self {
        Self {
            repository,
            trusted_sources,
        }
    }

    /// Find the local entity `remote` corresponds to.
    ///
    /// `scope` lists the clients whose entities the title/year tier may
    /// consider, normally every client registered for the requesting user.
    ///
    /// # Errors
    ///
    /// - `DataIntegrity` if `remote` carries no remote item ID for `client_id`
    /// - `Persistence` if a lookup fails
    pub async fn find_match<T: MediaData>(
        &self,
        remote: &MediaEntity<T>,
        client_id: ClientId,
        scope: &[ClientId],
    ) -> Result<Option<MatchOutcome>> {
        let remote_item_id = remote
            .remote_id(client_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SyncError::DataIntegrity(format!(
                    "{} '{}' has no remote item ID for client {}",
                    T::KIND,
                    remote.title,
                    client_id
                ))
            })?;

        if let Some(media_id) = self
            .repository
            .find_by_remote_id(T::KIND, client_id, remote_item_id)
            .await?
        {
            return Ok(Some(MatchOutcome {
                media_id,
                tier: MatchTier::RemoteId,
                candidates: 1,
            }));
        }

        let trusted = self.trusted_ids(remote);
        if !trusted.is_empty() {
            if let Some(media_id) = self
                .repository
                .find_by_external_ids(T::KIND, &trusted, client_id)
                .await?
            {
                debug!(media_id = %media_id, kind = %T::KIND, "Matched by external ID");
                return Ok(Some(MatchOutcome {
                    media_id,
                    tier: MatchTier::ExternalId,
                    candidates: 1,
                }));
            }
        }

        let normalized = remote.normalized_title();
        let Some(year) = remote.year() else {
            return Ok(None);
        };
        if normalized.is_empty() || scope.is_empty() {
            return Ok(None);
        }

        let candidates = self
            .repository
            .find_by_title_year(T::KIND, &normalized, year, scope, client_id)
            .await?;

        let Some(&media_id) = candidates.first() else {
            return Ok(None);
        };

        if candidates.len() > 1 {
            warn!(
                kind = %T::KIND,
                title = %remote.title,
                year,
                candidates = candidates.len(),
                chosen = %media_id,
                "Ambiguous title/year match, taking lowest ID"
            );
        }

        Ok(Some(MatchOutcome {
            media_id,
            tier: MatchTier::TitleYear,
            candidates: candidates.len(),
        }))
    }

    fn trusted_ids<T: MediaData>(&self, remote: &MediaEntity<T>) -> Vec<ExternalId> {
        remote
            .external_ids
            .iter()
            .filter(|id| self.trusted_sources.contains(&id.source))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::db::create_test_pool;
    use core_library::{ClientKind, MediaStore, Movie, SqliteMediaRepository};

    const CLIENT_A: ClientId = ClientId(1);
    const CLIENT_B: ClientId = ClientId(2);

    async fn setup() -> (MediaStore, EntityMatcher) {
        let pool = create_test_pool().await.unwrap();
        let repository: Arc<dyn MediaRepository> = Arc::new(SqliteMediaRepository::new(pool));
        let matcher = EntityMatcher::new(
            repository.clone(),
            vec![ExternalSource::Tmdb, ExternalSource::Imdb],
        );
        (MediaStore::new(repository), matcher)
    }

    fn movie(client: ClientId, remote: &str, title: &str) -> MediaEntity<Movie> {
        MediaEntity::from_remote(client, ClientKind::Jellyfin, remote, title, Movie::default())
    }

    #[tokio::test]
    async fn test_remote_id_beats_title_year() {
        let (store, matcher) = setup().await;
        let by_title = store
            .create(&movie(CLIENT_B, "b-1", "Arrival").with_release_year(2016))
            .await
            .unwrap();
        let by_remote = store
            .create(&movie(CLIENT_A, "a-9", "Something Else").with_release_year(1999))
            .await
            .unwrap();

        let remote = movie(CLIENT_A, "a-9", "Arrival").with_release_year(2016);
        let outcome = matcher
            .find_match(&remote, CLIENT_A, &[CLIENT_A, CLIENT_B])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.tier, MatchTier::RemoteId);
        assert_eq!(Some(outcome.media_id), by_remote.id);
        assert_ne!(Some(outcome.media_id), by_title.id);
    }

    #[tokio::test]
    async fn test_untrusted_external_ids_ignored() {
        let (store, matcher) = setup().await;
        store
            .create(&movie(CLIENT_B, "b-1", "Heat").with_external_id(ExternalSource::Trakt, "42"))
            .await
            .unwrap();

        let remote = movie(CLIENT_A, "a-1", "Heat").with_external_id(ExternalSource::Trakt, "42");
        let outcome = matcher.find_match(&remote, CLIENT_A, &[CLIENT_A]).await.unwrap();
        assert!(outcome.is_none());

        let trusted = movie(CLIENT_A, "a-1", "Heat").with_external_id(ExternalSource::Tmdb, "949");
        store
            .create(&movie(CLIENT_B, "b-2", "Heat").with_external_id(ExternalSource::Tmdb, "949"))
            .await
            .unwrap();
        let outcome = matcher
            .find_match(&trusted, CLIENT_A, &[CLIENT_A])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.tier, MatchTier::ExternalId);
    }

    #[tokio::test]
    async fn test_title_year_match_normalizes_title() {
        let (store, matcher) = setup().await;
        let existing = store
            .create(&movie(CLIENT_B, "b-1", "Dune").with_release_year(2021))
            .await
            .unwrap();

        let remote = movie(CLIENT_A, "a-1", "  DUNE ").with_release_year(2021);
        let outcome = matcher
            .find_match(&remote, CLIENT_A, &[CLIENT_A, CLIENT_B])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.tier, MatchTier::TitleYear);
        assert_eq!(Some(outcome.media_id), existing.id);
        assert!(!outcome.is_ambiguous());
    }

    #[tokio::test]
    async fn test_title_year_requires_year_and_scope() {
        let (store, matcher) = setup().await;
        store
            .create(&movie(CLIENT_B, "b-1", "Dune").with_release_year(2021))
            .await
            .unwrap();

        let no_year = movie(CLIENT_A, "a-1", "Dune");
        assert!(matcher
            .find_match(&no_year, CLIENT_A, &[CLIENT_A, CLIENT_B])
            .await
            .unwrap()
            .is_none());

        let other_user = movie(CLIENT_A, "a-1", "Dune").with_release_year(2021);
        assert!(matcher
            .find_match(&other_user, CLIENT_A, &[CLIENT_A])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_title_year_takes_lowest_id() {
        let (store, matcher) = setup().await;
        let first = store
            .create(&movie(CLIENT_B, "b-1", "Solaris").with_release_year(2002))
            .await
            .unwrap();
        store
            .create(&movie(CLIENT_B, "b-2", "Solaris").with_release_year(2002))
            .await
            .unwrap();

        let remote = movie(CLIENT_A, "a-1", "Solaris").with_release_year(2002);
        let outcome = matcher
            .find_match(&remote, CLIENT_A, &[CLIENT_B])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(Some(outcome.media_id), first.id);
        assert_eq!(outcome.candidates, 2);
        assert!(outcome.is_ambiguous());
    }

    #[tokio::test]
    async fn test_entity_mapped_on_requesting_client_not_reused() {
        let (store, matcher) = setup().await;
        store
            .create(
                &movie(CLIENT_A, "a-1", "Solaris")
                    .with_release_year(2002)
                    .with_external_id(ExternalSource::Tmdb, "2103"),
            )
            .await
            .unwrap();

        let same_title = movie(CLIENT_A, "a-2", "Solaris").with_release_year(2002);
        assert!(matcher
            .find_match(&same_title, CLIENT_A, &[CLIENT_A, CLIENT_B])
            .await
            .unwrap()
            .is_none());

        let same_external = movie(CLIENT_A, "a-3", "Solaris (Remastered)")
            .with_external_id(ExternalSource::Tmdb, "2103");
        assert!(matcher
            .find_match(&same_external, CLIENT_A, &[CLIENT_A])
            .await
            .unwrap()
            .is_none());

        let other_client = movie(CLIENT_B, "b-1", "Solaris").with_release_year(2002);
        let outcome = matcher
            .find_match(&other_client, CLIENT_B, &[CLIENT_A, CLIENT_B])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.tier, MatchTier::TitleYear);
    }

    #[tokio::test]
    async fn test_missing_remote_id_is_integrity_error() {
        let (_store, matcher) = setup().await;
        let remote = MediaEntity::new("Orphan", Movie::default());
        assert!(matches!(
            matcher.find_match(&remote, CLIENT_A, &[CLIENT_A]).await,
            Err(SyncError::DataIntegrity(_))
        ));
    }
}
