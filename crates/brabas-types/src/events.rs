use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Notification};

/// Row-level filter of a realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChangeFilter {
    /// Message inserts between `a` and `b`, in either direction.
    Conversation { a: Uuid, b: Uuid },
    /// Message inserts where `user_id` is sender or receiver.
    Inbox { user_id: Uuid },
    /// Notification inserts addressed to `user_id`.
    Notifications { user_id: Uuid },
}

impl ChangeFilter {
    /// A subscriber may only watch rows it could read itself.
    pub fn visible_to(&self, user_id: Uuid) -> bool {
        match *self {
            Self::Conversation { a, b } => a == user_id || b == user_id,
            Self::Inbox { user_id: u } | Self::Notifications { user_id: u } => u == user_id,
        }
    }

    pub fn matches(&self, change: &Change) -> bool {
        match (self, change) {
            (Self::Conversation { a, b }, Change::MessageInsert(m)) => m.is_between(*a, *b),
            (Self::Inbox { user_id }, Change::MessageInsert(m)) => {
                m.sender_id == *user_id || m.receiver_id == *user_id
            }
            (Self::Notifications { user_id }, Change::NotificationInsert(n)) => {
                n.user_id == *user_id
            }
            _ => false,
        }
    }
}

/// A row change published on the realtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record")]
pub enum Change {
    MessageInsert(Message),
    NotificationInsert(Notification),
}

/// Events sent from the server over the realtime WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// Handshake accepted
    Ready { user_id: Uuid },

    /// Subscription installed
    Subscribed { topic: String },

    /// Subscription refused (filter not visible to this user)
    Rejected { topic: String, reason: String },

    /// A change matching the topic's filter
    Change { topic: String, change: Change },
}

/// Commands sent from the client over the realtime WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Authenticate the connection with an access token
    Identify { token: String },

    /// Start receiving changes matching `filter` under `topic`
    Subscribe { topic: String, filter: ChangeFilter },

    /// Stop a previously installed topic
    Unsubscribe { topic: String },
}
