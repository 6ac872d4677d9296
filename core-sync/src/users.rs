//! Users and their sync preferences
//!
//! The orchestrator only needs to enumerate active users and read which sync
//! features each has enabled; account management lives elsewhere and plugs
//! in through [`UserDirectory`].

use crate::conflict_resolver::SyncDirection;
use crate::job::Frequency;
use crate::Result;
use async_trait::async_trait;
use core_library::{ClientId, MediaKind, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSyncPreferences {
    pub enabled: bool,
    /// Catalog kinds to reconcile
    pub media_kinds: Vec<MediaKind>,
    /// Frequency given to per-kind configs created on first sync
    pub default_frequency: Frequency,
}

impl Default for MediaSyncPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            media_kinds: MediaKind::CATALOG.to_vec(),
            default_frequency: Frequency::Daily,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSyncPreferences {
    pub enabled: bool,
    pub direction: SyncDirection,
    pub primary_client: Option<ClientId>,
    pub default_frequency: Frequency,
}

impl Default for ListSyncPreferences {
    fn default() -> Self {
        Self {
            enabled: false,
            direction: SyncDirection::Bidirectional,
            primary_client: None,
            default_frequency: Frequency::Daily,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSyncPreferences {
    pub media: MediaSyncPreferences,
    pub playlists: ListSyncPreferences,
    pub collections: ListSyncPreferences,
}

impl UserSyncPreferences {
    /// Whether the feature covering `kind` is switched on
    pub fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Playlist => self.playlists.enabled,
            MediaKind::Collection => self.collections.enabled,
            other => self.media.enabled && self.media.media_kinds.contains(&other),
        }
    }

    pub fn list_preferences(&self, kind: MediaKind) -> Option<&ListSyncPreferences> {
        match kind {
            MediaKind::Playlist => Some(&self.playlists),
            MediaKind::Collection => Some(&self.collections),
            _ => None,
        }
    }

    pub fn default_frequency(&self, kind: MediaKind) -> Frequency {
        self.list_preferences(kind)
            .map(|p| p.default_frequency)
            .unwrap_or(self.media.default_frequency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUser {
    pub id: UserId,
    pub active: bool,
    #[serde(default)]
    pub preferences: UserSyncPreferences,
}

impl SyncUser {
    pub fn new(id: UserId, preferences: UserSyncPreferences) -> Self {
        Self {
            id,
            active: true,
            preferences,
        }
    }
}

/// Source of users eligible for syncing
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Active users, in a stable order
    async fn active_users(&self) -> Result<Vec<SyncUser>>;

    async fn find_user(&self, user_id: UserId) -> Result<Option<SyncUser>>;
}

/// In-memory user directory
#[derive(Default)]
pub struct StaticUserDirectory {
    users: RwLock<Vec<SyncUser>>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<SyncUser>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    /// Insert or replace a user
    pub async fn upsert(&self, user: SyncUser) {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn active_users(&self) -> Result<Vec<SyncUser>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .filter(|u| u.active)
            .cloned()
            .collect())
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<SyncUser>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.id == user_id)
            .cloned())
    }
}
