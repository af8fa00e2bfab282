//! Actions that could not reach the backend, persisted and replayed later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use brabas_types::api::CreatePostRequest;

use crate::backend::TableBackend;
use crate::error::BackendError;
use crate::storage::{LocalStore, keys, load_json, save_json};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OfflineAction {
    SendMessage { receiver_id: Uuid, content: String },
    CreatePost(CreatePostRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: Uuid,
    pub queued_at: DateTime<Utc>,
    pub action: OfflineAction,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    /// Rejected by the backend for reasons other than connectivity.
    pub dropped: usize,
    pub remaining: usize,
}

pub struct OfflineQueue {
    store: Arc<dyn LocalStore>,
    flush_lock: AsyncMutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            flush_lock: AsyncMutex::new(()),
        }
    }

    pub fn enqueue(&self, action: OfflineAction) -> Uuid {
        let mut queue = self.pending();
        let id = Uuid::new_v4();
        queue.push(QueuedAction {
            id,
            queued_at: Utc::now(),
            action,
        });
        info!("Queued offline action ({} pending)", queue.len());
        save_json(self.store.as_ref(), keys::OFFLINE_QUEUE, &queue);
        id
    }

    /// Queued actions, oldest first.
    pub fn pending(&self) -> Vec<QueuedAction> {
        load_json(self.store.as_ref(), keys::OFFLINE_QUEUE).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.store.remove(keys::OFFLINE_QUEUE);
    }

    /// Replay queued actions in order. Stops at the first connectivity
    /// failure, keeping it and everything after it queued. Actions the
    /// backend rejects outright are dropped.
    pub async fn flush<B>(&self, backend: &B) -> FlushReport
    where
        B: TableBackend + ?Sized,
    {
        let _guard = self.flush_lock.lock().await;
        let mut report = FlushReport::default();
        let mut done = Vec::new();

        for queued in self.pending() {
            match replay(backend, &queued.action).await {
                Ok(()) => report.sent += 1,
                Err(e) if e.is_network() => {
                    warn!("Still offline, stopping flush: {}", e);
                    break;
                }
                Err(e) => {
                    warn!("Dropping queued action {}: {}", queued.id, e);
                    report.dropped += 1;
                }
            }
            done.push(queued.id);
        }

        // Actions queued while flushing stay behind the replayed ones.
        let remaining: Vec<QueuedAction> = self
            .pending()
            .into_iter()
            .filter(|q| !done.contains(&q.id))
            .collect();
        report.remaining = remaining.len();
        if remaining.is_empty() {
            self.store.remove(keys::OFFLINE_QUEUE);
        } else {
            save_json(self.store.as_ref(), keys::OFFLINE_QUEUE, &remaining);
        }
        if report.sent > 0 || report.dropped > 0 {
            info!(
                "Offline queue flushed: {} sent, {} dropped, {} remaining",
                report.sent, report.dropped, report.remaining
            );
        }
        report
    }
}

async fn replay<B>(backend: &B, action: &OfflineAction) -> Result<(), BackendError>
where
    B: TableBackend + ?Sized,
{
    match action {
        OfflineAction::SendMessage {
            receiver_id,
            content,
        } => backend.send_message(*receiver_id, content).await.map(|_| ()),
        OfflineAction::CreatePost(req) => backend.create_post(req).await.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn queue_persists_in_order() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::new(Arc::clone(&store));
        let receiver_id = Uuid::new_v4();
        queue.enqueue(OfflineAction::SendMessage {
            receiver_id,
            content: "primeira".into(),
        });
        queue.enqueue(OfflineAction::CreatePost(CreatePostRequest {
            content: "segunda".into(),
            ..Default::default()
        }));

        let reopened = OfflineQueue::new(store);
        let pending = reopened.pending();
        assert_eq!(pending.len(), 2);
        assert!(matches!(
            &pending[0].action,
            OfflineAction::SendMessage { content, .. } if content == "primeira"
        ));
        reopened.clear();
        assert!(reopened.is_empty());
    }

    #[test]
    fn wire_format_is_tagged() {
        let action = OfflineAction::CreatePost(CreatePostRequest {
            content: "oi".into(),
            ..Default::default()
        });
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "create_post");
        assert_eq!(json["payload"]["content"], "oi");
        let back: OfflineAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }
}
