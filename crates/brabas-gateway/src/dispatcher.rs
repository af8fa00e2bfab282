use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use brabas_types::events::Change;

/// Fans row changes out to every realtime connection. Each connection
/// applies its own subscription filters.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<Change>,

    /// user_id -> number of open realtime connections
    connections: RwLock<HashMap<Uuid, usize>>,
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
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a committed change. Having no listeners is not an error.
    pub fn publish(&self, change: Change) {
        let _ = self.inner.broadcast_tx.send(change);
    }

    pub async fn connected(&self, user_id: Uuid) {
        *self.inner.connections.write().await.entry(user_id).or_default() += 1;
    }

    pub async fn disconnected(&self, user_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(n) = connections.get_mut(&user_id) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                connections.remove(&user_id);
            }
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }
}
