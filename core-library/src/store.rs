//! Typed facade over [`MediaRepository`]
//!
//! Converts between `MediaEntity<T>` and the untyped [`MediaRecord`] storage
//! form and implements optimistic read-modify-write.

use crate::error::{LibraryError, Result};
use crate::models::{ClientId, MediaData, MediaEntity, MediaId};
use crate::repositories::{MediaRecord, MediaRepository};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts made by [`MediaStore::update_with`] before giving up on a
/// contended entity.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Result of a read-modify-write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Updated(MediaId),
    Unchanged(MediaId),
}

impl WriteOutcome {
    pub fn id(&self) -> MediaId {
        match self {
            WriteOutcome::Updated(id) | WriteOutcome::Unchanged(id) => *id,
        }
    }
}

#[derive(Clone)]
pub struct MediaStore {
    repository: Arc<dyn MediaRepository>,
}

impl MediaStore {
    pub fn new(repository: Arc<dyn MediaRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn MediaRepository> {
        &self.repository
    }

    /// Load an entity, failing if the stored kind differs from `T::KIND`.
    pub async fn get<T: MediaData>(&self, id: MediaId) -> Result<Option<MediaEntity<T>>> {
        match self.repository.find_by_id(id).await? {
            Some(record) => Ok(Some(Self::from_record(record)?)),
            None => Ok(None),
        }
    }

    /// Load the entity of kind `T` mapped to `remote_item_id` on `client_id`.
    pub async fn find_by_remote_id<T: MediaData>(
        &self,
        client_id: ClientId,
        remote_item_id: &str,
    ) -> Result<Option<MediaEntity<T>>> {
        match self
            .repository
            .find_by_remote_id(T::KIND, client_id, remote_item_id)
            .await?
        {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    /// Persist a new entity and return it with its assigned identity.
    pub async fn create<T: MediaData>(&self, entity: &MediaEntity<T>) -> Result<MediaEntity<T>> {
        entity
            .validate()
            .map_err(|message| LibraryError::InvalidInput {
                field: T::KIND.to_string(),
                message,
            })?;

        let mut created = entity.clone();
        created.id = None;
        created.version = 0;
        let id = self.repository.insert(&Self::to_record(&created)?).await?;
        created.id = Some(id);
        created.version = 1;

        debug!(media_id = %id, kind = %T::KIND, title = %created.title, "Created media entity");
        Ok(created)
    }

    /// Write back an entity read earlier. Fails with `VersionConflict` if it
    /// was modified in between.
    pub async fn save<T: MediaData>(&self, entity: &MediaEntity<T>) -> Result<MediaEntity<T>> {
        entity
            .validate()
            .map_err(|message| LibraryError::InvalidInput {
                field: T::KIND.to_string(),
                message,
            })?;

        let version = self.repository.update(&Self::to_record(entity)?).await?;
        let mut saved = entity.clone();
        saved.version = version;
        Ok(saved)
    }

    /// Apply `change` to the current state of an entity and write the result,
    /// reloading and reapplying on version conflicts.
    ///
    /// `change` returns `None` when the entity needs no write.
    pub async fn update_with<T, F>(&self, id: MediaId, mut change: F) -> Result<WriteOutcome>
    where
        T: MediaData,
        F: FnMut(&MediaEntity<T>) -> Option<MediaEntity<T>> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current: MediaEntity<T> =
                self.get(id).await?.ok_or_else(|| LibraryError::NotFound {
                    entity_type: T::KIND.to_string(),
                    id: id.to_string(),
                })?;

            let Some(mut next) = change(&current) else {
                return Ok(WriteOutcome::Unchanged(id));
            };
            next.id = Some(id);
            next.version = current.version;

            match self.save(&next).await {
                Ok(_) => return Ok(WriteOutcome::Updated(id)),
                Err(LibraryError::VersionConflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(media_id = %id, attempt, "Version conflict, retrying write");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn to_record<T: MediaData>(entity: &MediaEntity<T>) -> Result<MediaRecord> {
        Ok(MediaRecord {
            id: entity.id,
            kind: T::KIND,
            title: entity.title.clone(),
            normalized_title: entity.normalized_title(),
            release_year: entity.year(),
            version: entity.version,
            body: serde_json::to_string(entity)?,
            sync_clients: entity.sync_clients.clone(),
            external_ids: entity.external_ids.clone(),
        })
    }

    pub fn from_record<T: MediaData>(record: MediaRecord) -> Result<MediaEntity<T>> {
        if record.kind != T::KIND {
            return Err(LibraryError::InvalidInput {
                field: "kind".to_string(),
                message: format!("expected {}, found {}", T::KIND, record.kind),
            });
        }

        let mut entity: MediaEntity<T> = serde_json::from_str(&record.body)?;
        entity.id = record.id;
        entity.version = record.version;
        Ok(entity)
    }
}
