//! The seams between the client core and the backend service. The HTTP
//! implementation lives in [`crate::http`]; tests plug in an in-memory one.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use brabas_types::api::{AuthUser, CreatePostRequest, LikeResponse, PostQuery, Session};
use brabas_types::events::{Change, ChangeFilter};
use brabas_types::models::{Comment, Contact, Message, PollData, Post, Profile, ProfilePatch};

use crate::error::BackendError;

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(AuthUser),
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The stored session, refreshed first if its access token expired.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    async fn refresh_session(&self) -> Result<Option<Session>, BackendError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
pub trait TableBackend: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, BackendError>;

    /// `None` when no row has this id.
    async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<Profile>, BackendError>;

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, BackendError>;

    async fn list_contacts(&self) -> Result<Vec<Contact>, BackendError>;

    async fn get_conversation(&self, other: Uuid) -> Result<Vec<Message>, BackendError>;

    async fn send_message(&self, receiver: Uuid, content: &str) -> Result<Message, BackendError>;

    async fn mark_read(&self, other: Uuid) -> Result<u64, BackendError>;

    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, BackendError>;

    async fn create_post(&self, req: &CreatePostRequest) -> Result<Post, BackendError>;

    async fn delete_post(&self, id: Uuid) -> Result<(), BackendError>;

    async fn soft_delete_post(&self, id: Uuid) -> Result<Post, BackendError>;

    async fn toggle_pin(&self, id: Uuid) -> Result<Post, BackendError>;

    async fn toggle_like(&self, id: Uuid) -> Result<LikeResponse, BackendError>;

    async fn list_comments(&self, post: Uuid) -> Result<Vec<Comment>, BackendError>;

    async fn create_comment(&self, post: Uuid, content: &str) -> Result<Comment, BackendError>;

    async fn vote(&self, post: Uuid, option: usize) -> Result<PollData, BackendError>;

    /// The backend's authoritative admin answer for the signed-in user.
    async fn admin_status(&self) -> Result<bool, BackendError>;
}

#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        filter: ChangeFilter,
    ) -> Result<Subscription, BackendError>;
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store an object and return its public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError>;
}

/// Everything the client needs from a backend.
pub trait Backend: AuthBackend + TableBackend + RealtimeBackend + StorageBackend {}

impl<T> Backend for T where T: AuthBackend + TableBackend + RealtimeBackend + StorageBackend {}

/// A live realtime subscription. Dropping it ends the subscription.
pub struct Subscription {
    topic: String,
    changes: mpsc::UnboundedReceiver<Change>,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    /// `pump` is the task feeding `changes`, aborted when this is dropped.
    pub fn new(
        topic: impl Into<String>,
        changes: mpsc::UnboundedReceiver<Change>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            changes,
            pump,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next change, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Change> {
        self.changes.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
