//! Presence registry: which users currently have a live connection.
//!
//! One handle per user, last registration wins.  State is process-lifetime
//! only; after a restart every client re-registers on reconnect.  The map
//! sits behind a `tokio::sync::RwLock` because register/unregister/lookup
//! arrive from arbitrary connection-handler tasks concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use palaver_shared::{ServerEvent, UserId};

/// Outbound queue depth per connection.
const HANDLE_BUFFER: usize = 256;

/// The sending side of one client connection.
///
/// Cloneable; every clone feeds the same writer task.  The `connection_id`
/// distinguishes this physical connection from any later one the same user
/// opens.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task will drain.
    pub fn new() -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(HANDLE_BUFFER);
        (
            Self {
                connection_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Queue an event for delivery.  Returns false when the queue is full or
    /// the connection is gone; events are ephemeral at this layer, so the
    /// caller decides whether that matters.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

/// In-memory map from user to their current connection handle.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Associate `user` with `handle`, replacing any prior handle for that
    /// user, then broadcast the updated online set to every connection
    /// (the new one included, so it learns the current set immediately).
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) {
        {
            let mut map = self.inner.write().await;
            if let Some(old) = map.insert(user.clone(), handle) {
                debug!(
                    user = %user,
                    old_connection = %old.connection_id,
                    "replaced existing presence entry"
                );
            }
        }
        debug!(user = %user, "registered presence");
        self.broadcast_presence().await;
    }

    /// Remove the mapping for `user`, but only if the registered handle is
    /// still the one identified by `connection_id`.
    ///
    /// A client that reconnects quickly re-registers under a new handle
    /// before the old socket's disconnect fires; deleting unconditionally
    /// would knock the fresh connection offline.  Returns whether an entry
    /// was actually removed.
    pub async fn unregister(&self, user: &UserId, connection_id: Uuid) -> bool {
        let removed = {
            let mut map = self.inner.write().await;
            match map.get(user) {
                Some(current) if current.connection_id == connection_id => {
                    map.remove(user);
                    true
                }
                _ => false,
            }
        };

        if removed {
            debug!(user = %user, "unregistered presence");
            self.broadcast_presence().await;
        } else {
            debug!(user = %user, "ignoring stale disconnect");
        }
        removed
    }

    /// Current handle for `user`, if they are online.
    pub async fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.inner.read().await.get(user).cloned()
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.inner.read().await.contains_key(user)
    }

    /// Snapshot of all online users.
    pub async fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.inner.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    /// Push the online-user set to every connection.  O(N) fan-out per
    /// presence change, an accepted cost at this scale.
    async fn broadcast_presence(&self) {
        let map = self.inner.read().await;
        let mut online: Vec<UserId> = map.keys().cloned().collect();
        online.sort();

        for handle in map.values() {
            handle.send(ServerEvent::Presence {
                online: online.clone(),
            });
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
