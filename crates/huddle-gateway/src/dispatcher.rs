use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use huddle_types::events::GatewayEvent;

/// Fan-out hub for gateway events. Every connection receives broadcasts and
/// filters them for its own session; targeted events go to one user.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events; each connection filters what it forwards
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Track online users: user_id -> display name
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// A newer connection for the same user replaces the older one.
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user. Dropped if they are offline.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Register a user as online.
    pub async fn user_online(&self, user_id: Uuid, name: String) {
        self.inner
            .online_users
            .write()
            .await
            .insert(user_id, name.clone());

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            name,
            online: true,
            last_seen: None,
        });
    }

    /// Register a user as offline. Only cleans up if conn_id matches.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            // A newer connection has taken over
            return;
        }

        let name = self
            .inner
            .online_users
            .write()
            .await
            .remove(&user_id)
            .unwrap_or_default();

        self.unregister_user_channel(user_id, conn_id).await;

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            name,
            online: false,
            last_seen: None,
        });
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn targeted_events_reach_only_the_current_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, mut old_rx) = dispatcher.register_user_channel(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(user).await;

        dispatcher
            .send_to_user(user, GatewayEvent::UnreadUpdate { workspace_id: Uuid::nil(), total: 3 })
            .await;
        assert!(matches!(new_rx.try_recv(), Ok(GatewayEvent::UnreadUpdate { total: 3, .. })));
        assert!(old_rx.try_recv().is_err());

        // The stale connection going away must not evict the new one.
        dispatcher.user_online(user, "ada".into()).await;
        dispatcher.user_offline(user, old_conn).await;
        assert_eq!(dispatcher.online_users().await, vec![(user, "ada".to_string())]);
    }

    #[tokio::test]
    async fn presence_is_broadcast() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let user = Uuid::new_v4();

        let (conn, _user_rx) = dispatcher.register_user_channel(user).await;
        dispatcher.user_online(user, "ada".into()).await;
        dispatcher.user_offline(user, conn).await;

        match rx.recv().await.unwrap() {
            GatewayEvent::PresenceUpdate { online, name, .. } => {
                assert!(online);
                assert_eq!(name, "ada");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), GatewayEvent::PresenceUpdate { online: false, .. }));
        assert!(dispatcher.online_users().await.is_empty());
    }
}
