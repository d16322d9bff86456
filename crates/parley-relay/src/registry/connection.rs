//! In-memory connection registry for user presence.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_proto::UserId;

/// Opaque identity of one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mint a fresh id for a newly accepted connection.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Holds the outbound side of a live client connection.
pub struct ClientConnection {
    /// Id assigned when the connection was accepted.
    pub id: ConnectionId,
    /// Encoded frames waiting for the connection's writer task.
    frame_tx: mpsc::Sender<String>,
}

impl ClientConnection {
    pub const fn new(id: ConnectionId, frame_tx: mpsc::Sender<String>) -> Self {
        Self { id, frame_tx }
    }

    /// Queue a frame without waiting for room.
    pub fn try_send_frame(&self, frame: String) -> Result<(), mpsc::error::TrySendError<String>> {
        self.frame_tx.try_send(frame)
    }

    /// Whether the writer side of the connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.frame_tx.is_closed()
    }
}

/// Result of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The user had no live connection before.
    New,
    /// The user was already bound to this same connection.
    Unchanged,
    /// The user's previous connection was replaced. It is not notified.
    Superseded(ConnectionId),
}

#[derive(Default)]
struct Presence {
    by_user: HashMap<UserId, Arc<ClientConnection>>,
    by_connection: HashMap<ConnectionId, UserId>,
}

/// Thread-safe registry of which user is online on which connection.
///
/// Holds at most one connection per user and at most one user per
/// connection. Both maps sit behind one lock so lookups never observe a
/// half-applied register or unregister.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    presence: Arc<RwLock<Presence>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `conn`, replacing any earlier binding of the user.
    ///
    /// If `conn` was bound to a different user, that binding is dropped.
    pub async fn register(&self, user_id: UserId, conn: Arc<ClientConnection>) -> Registration {
        let conn_id = conn.id;
        let mut presence = self.presence.write().await;

        if let Some(prior_user) = presence.by_connection.get(&conn_id).cloned() {
            if prior_user != user_id {
                presence.by_user.remove(&prior_user);
                warn!(
                    connection_id = %conn_id,
                    prior_user_id = %prior_user,
                    user_id = %user_id,
                    "Connection re-announced under a different user"
                );
            }
        }

        let previous = presence.by_user.insert(user_id.clone(), conn);
        presence.by_connection.insert(conn_id, user_id.clone());

        let registration = match previous {
            None => Registration::New,
            Some(prev) if prev.id == conn_id => Registration::Unchanged,
            Some(prev) => {
                presence.by_connection.remove(&prev.id);
                Registration::Superseded(prev.id)
            }
        };
        #[cfg(feature = "metrics")]
        parley_core::metrics::record_online_users(presence.by_user.len());
        drop(presence);

        match &registration {
            Registration::New => {
                info!(user_id = %user_id, connection_id = %conn_id, "User online");
            }
            Registration::Unchanged => {
                debug!(user_id = %user_id, connection_id = %conn_id, "User re-announced");
            }
            Registration::Superseded(old) => {
                info!(
                    user_id = %user_id,
                    connection_id = %conn_id,
                    superseded = %old,
                    "User moved to a new connection"
                );
            }
        }
        registration
    }

    /// Remove whatever binding `conn_id` holds. Returns the unbound user.
    ///
    /// Unknown and already-superseded connections are a no-op.
    pub async fn unregister(&self, conn_id: &ConnectionId) -> Option<UserId> {
        let mut presence = self.presence.write().await;
        let Some(user_id) = presence.by_connection.remove(conn_id) else {
            drop(presence);
            debug!(connection_id = %conn_id, "No presence to remove for connection");
            return None;
        };

        if presence
            .by_user
            .get(&user_id)
            .is_some_and(|conn| conn.id == *conn_id)
        {
            presence.by_user.remove(&user_id);
            #[cfg(feature = "metrics")]
            parley_core::metrics::record_online_users(presence.by_user.len());
        } else {
            error!(
                user_id = %user_id,
                connection_id = %conn_id,
                "Presence index out of sync: reverse entry without forward entry"
            );
        }
        drop(presence);

        info!(user_id = %user_id, connection_id = %conn_id, "User offline");
        Some(user_id)
    }

    /// Current connection id for a user, if online.
    pub async fn lookup(&self, user_id: &UserId) -> Option<ConnectionId> {
        self.presence
            .read()
            .await
            .by_user
            .get(user_id)
            .map(|conn| conn.id)
    }

    /// Current connection handle for a user, if online.
    pub async fn get(&self, user_id: &UserId) -> Option<Arc<ClientConnection>> {
        self.presence.read().await.by_user.get(user_id).cloned()
    }

    /// User bound to a connection, if any.
    pub async fn user_for(&self, conn_id: &ConnectionId) -> Option<UserId> {
        self.presence.read().await.by_connection.get(conn_id).cloned()
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.presence.read().await.by_user.contains_key(user_id)
    }

    /// All users with a live connection.
    pub async fn online_users(&self) -> Vec<UserId> {
        self.presence.read().await.by_user.keys().cloned().collect()
    }

    /// Count of online users.
    pub async fn online_count(&self) -> usize {
        self.presence.read().await.by_user.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn conn() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(16);
        Arc::new(ClientConnection::new(ConnectionId::new(), tx))
    }

    /// Forward and reverse maps describe the same bindings.
    async fn assert_consistent(registry: &ConnectionRegistry) {
        let presence = registry.presence.read().await;
        assert_eq!(presence.by_user.len(), presence.by_connection.len());
        for (user, conn) in &presence.by_user {
            assert_eq!(presence.by_connection.get(&conn.id), Some(user));
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let c1 = conn();

        let reg = registry.register(uid("alice"), Arc::clone(&c1)).await;

        assert_eq!(reg, Registration::New);
        assert_eq!(registry.lookup(&uid("alice")).await, Some(c1.id));
        assert_eq!(registry.lookup(&uid("bob")).await, None);
        assert_eq!(registry.user_for(&c1.id).await, Some(uid("alice")));
        assert!(registry.is_online(&uid("alice")).await);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = ConnectionRegistry::new();
        let (c1, c2) = (conn(), conn());

        registry.register(uid("alice"), Arc::clone(&c1)).await;
        let reg = registry.register(uid("alice"), Arc::clone(&c2)).await;

        assert_eq!(reg, Registration::Superseded(c1.id));
        assert_eq!(registry.lookup(&uid("alice")).await, Some(c2.id));
        assert_eq!(registry.online_count().await, 1);
        assert_eq!(registry.user_for(&c1.id).await, None);
        assert_consistent(&registry).await;
    }

    #[tokio::test]
    async fn reannounce_on_same_connection_is_unchanged() {
        let registry = ConnectionRegistry::new();
        let c1 = conn();

        registry.register(uid("alice"), Arc::clone(&c1)).await;
        let reg = registry.register(uid("alice"), Arc::clone(&c1)).await;

        assert_eq!(reg, Registration::Unchanged);
        assert_eq!(registry.online_count().await, 1);
        assert_consistent(&registry).await;
    }

    #[tokio::test]
    async fn connection_rebound_to_new_user_drops_old_binding() {
        let registry = ConnectionRegistry::new();
        let c1 = conn();

        registry.register(uid("alice"), Arc::clone(&c1)).await;
        registry.register(uid("mallory"), Arc::clone(&c1)).await;

        assert_eq!(registry.lookup(&uid("alice")).await, None);
        assert_eq!(registry.lookup(&uid("mallory")).await, Some(c1.id));
        assert_consistent(&registry).await;
    }

    #[tokio::test]
    async fn unregister_removes_binding() {
        let registry = ConnectionRegistry::new();
        let c1 = conn();
        registry.register(uid("alice"), Arc::clone(&c1)).await;

        assert_eq!(registry.unregister(&c1.id).await, Some(uid("alice")));
        assert_eq!(registry.lookup(&uid("alice")).await, None);
        assert_eq!(registry.online_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (c1, c2) = (conn(), conn());
        registry.register(uid("alice"), Arc::clone(&c1)).await;
        registry.register(uid("bob"), Arc::clone(&c2)).await;

        assert!(registry.unregister(&c1.id).await.is_some());
        assert!(registry.unregister(&c1.id).await.is_none());
        assert!(registry.unregister(&ConnectionId::new()).await.is_none());

        assert_eq!(registry.online_users().await, vec![uid("bob")]);
        assert_consistent(&registry).await;
    }

    #[tokio::test]
    async fn superseded_disconnect_keeps_new_binding() {
        let registry = ConnectionRegistry::new();
        let (c1, c2) = (conn(), conn());
        registry.register(uid("alice"), Arc::clone(&c1)).await;
        registry.register(uid("alice"), Arc::clone(&c2)).await;

        assert_eq!(registry.unregister(&c1.id).await, None);
        assert_eq!(registry.lookup(&uid("alice")).await, Some(c2.id));
    }

    #[tokio::test]
    async fn concurrent_churn_keeps_indexes_consistent() {
        let registry = ConnectionRegistry::new();
        let users: Vec<UserId> = (0..8u64).map(UserId::from).collect();

        let mut handles = Vec::new();
        for round in 0..64usize {
            let registry = registry.clone();
            let user = users[round % users.len()].clone();
            handles.push(tokio::spawn(async move {
                let c = conn();
                registry.register(user.clone(), Arc::clone(&c)).await;
                if round % 2 == 0 {
                    registry.unregister(&c.id).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(registry.online_count().await <= users.len());
        assert_consistent(&registry).await;
    }
}
