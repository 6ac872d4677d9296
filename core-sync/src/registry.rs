//! Registered remote clients, per user
//!
//! The registry is constructed explicitly and shared by reference; clients
//! keep their registration order, which is the listing order used by list
//! sync policies.

use bridge_traits::ClientHandle;
use core_library::{ClientId, UserId};
use tokio::sync::RwLock;
use tracing::info;

struct Registration {
    user_id: UserId,
    handle: ClientHandle,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<Vec<Registration>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client for a user, replacing any client with the same ID
    /// in place.
    pub async fn register(&self, user_id: UserId, handle: ClientHandle) {
        let mut clients = self.clients.write().await;
        info!(
            user_id = %user_id,
            client_id = %handle.id(),
            client = handle.name(),
            "Registered client"
        );
        match clients.iter_mut().find(|r| r.handle.id() == handle.id()) {
            Some(existing) => {
                existing.user_id = user_id;
                existing.handle = handle;
            }
            None => clients.push(Registration { user_id, handle }),
        }
    }

    pub async fn unregister(&self, client_id: ClientId) -> bool {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|r| r.handle.id() != client_id);
        before != clients.len()
    }

    /// Clients of a user in registration order
    pub async fn clients_for_user(&self, user_id: UserId) -> Vec<ClientHandle> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.handle.clone())
            .collect()
    }

    pub async fn get(&self, client_id: ClientId) -> Option<(UserId, ClientHandle)> {
        self.clients
            .read()
            .await
            .iter()
            .find(|r| r.handle.id() == client_id)
            .map(|r| (r.user_id, r.handle.clone()))
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
