//! Execution locks
//!
//! At most one sync may run per (user, client, media kind). A lock is held by
//! a [`SyncLockGuard`] and released when the guard drops, including on error
//! and cancellation paths.

use crate::{Result, SyncError};
use core_library::{ClientId, MediaKind, UserId};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub user_id: UserId,
    pub client_id: ClientId,
    pub media_kind: MediaKind,
}

impl SyncKey {
    pub fn new(user_id: UserId, client_id: ClientId, media_kind: MediaKind) -> Self {
        Self {
            user_id,
            client_id,
            media_kind,
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user {} / client {} / {}",
            self.user_id, self.client_id, self.media_kind
        )
    }
}

#[derive(Clone, Default)]
pub struct SyncLocks {
    held: Arc<Mutex<HashSet<SyncKey>>>,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<SyncKey>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// # Errors
    ///
    /// Returns `SyncInProgress` if the key is already held
    pub fn try_acquire(&self, key: SyncKey) -> Result<SyncLockGuard> {
        if !self.held().insert(key) {
            return Err(SyncError::SyncInProgress {
                key: key.to_string(),
            });
        }
        trace!(key = %key, "Acquired sync lock");
        Ok(SyncLockGuard {
            locks: self.clone(),
            keys: vec![key],
        })
    }

    /// Acquire every key or none of them.
    pub fn try_acquire_all(&self, keys: &[SyncKey]) -> Result<SyncLockGuard> {
        let mut held = self.held();
        if let Some(busy) = keys.iter().find(|k| held.contains(k)) {
            return Err(SyncError::SyncInProgress {
                key: busy.to_string(),
            });
        }
        held.extend(keys.iter().copied());
        drop(held);

        Ok(SyncLockGuard {
            locks: self.clone(),
            keys: keys.to_vec(),
        })
    }

    pub fn is_held(&self, key: &SyncKey) -> bool {
        self.held().contains(key)
    }
}

/// Releases its keys on drop
pub struct SyncLockGuard {
    locks: SyncLocks,
    keys: Vec<SyncKey>,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        let mut held = self.locks.held();
        for key in &self.keys {
            held.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(client: i64) -> SyncKey {
        SyncKey::new(UserId(1), ClientId(client), MediaKind::Movie)
    }

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let locks = SyncLocks::new();
        let guard = locks.try_acquire(key(1)).unwrap();

        let err = locks.try_acquire(key(1)).err().unwrap();
        assert!(matches!(err, SyncError::SyncInProgress { .. }));
        assert!(locks.try_acquire(key(2)).is_ok());

        drop(guard);
        assert!(!locks.is_held(&key(1)));
        assert!(locks.try_acquire(key(1)).is_ok());
    }

    #[test]
    fn test_acquire_all_is_atomic() {
        let locks = SyncLocks::new();
        let _busy = locks.try_acquire(key(2)).unwrap();

        assert!(locks.try_acquire_all(&[key(1), key(2)]).is_err());
        assert!(!locks.is_held(&key(1)));

        let guard = locks.try_acquire_all(&[key(1), key(3)]).unwrap();
        assert!(locks.is_held(&key(3)));
        drop(guard);
        assert!(!locks.is_held(&key(1)));
    }
}
