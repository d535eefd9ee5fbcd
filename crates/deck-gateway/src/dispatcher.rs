use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use deck_types::events::PushEvent;

/// Routes push events to every live connection of a user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> outbound push channel)
    connections: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<PushEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering the user's push events to this connection.
    pub async fn attach(&self, user_id: Uuid, conn_id: Uuid, tx: mpsc::UnboundedSender<PushEvent>) {
        self.inner
            .connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
    }

    /// Stop delivering to one connection. Other connections of the user stay attached.
    pub async fn detach(&self, user_id: Uuid, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(conns) = connections.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                connections.remove(&user_id);
            }
        }
    }

    /// Send an event to all of the user's connections. Returns how many accepted it.
    pub async fn send_to_user(&self, user_id: Uuid, event: PushEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let Some(conns) = connections.get(&user_id) else {
            debug!("{} has no live connection, dropping {}", user_id, event.name());
            return 0;
        };
        conns
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_types::models::CoinBalances;

    fn balance(n: i64) -> PushEvent {
        PushEvent::UpdateCoinBalance(CoinBalances {
            coin_balance: n,
            temporary_coin_balance: 0,
        })
    }

    #[tokio::test]
    async fn test_event_reaches_every_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        dispatcher.attach(user, Uuid::new_v4(), tx1).await;
        dispatcher.attach(user, Uuid::new_v4(), tx2).await;

        assert_eq!(dispatcher.send_to_user(user, balance(3)).await, 2);
        assert!(matches!(rx1.recv().await, Some(PushEvent::UpdateCoinBalance(b)) if b.coin_balance == 3));
        assert!(matches!(rx2.recv().await, Some(PushEvent::UpdateCoinBalance(b)) if b.coin_balance == 3));
    }

    #[tokio::test]
    async fn test_detach_keeps_other_connections() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        dispatcher.attach(user, first, tx1).await;
        dispatcher.attach(user, second, tx2).await;

        dispatcher.detach(user, first).await;
        assert!(dispatcher.is_online(user).await);
        assert_eq!(dispatcher.connection_count().await, 1);

        dispatcher.detach(user, second).await;
        assert!(!dispatcher.is_online(user).await);
    }

    #[tokio::test]
    async fn test_offline_user_drops_event() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.send_to_user(Uuid::new_v4(), balance(1)).await, 0);
    }
}
