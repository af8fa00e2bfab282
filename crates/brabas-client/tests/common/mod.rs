#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use brabas_client::backend::{
    AuthBackend, AuthEvent, RealtimeBackend, StorageBackend, Subscription, TableBackend,
};
use brabas_client::error::BackendError;
use brabas_types::api::{AuthUser, CreatePostRequest, LikeResponse, PostQuery, Session};
use brabas_types::events::{Change, ChangeFilter};
use brabas_types::models::{
    Comment, Contact, Message, PollData, Post, Profile, ProfilePatch, REMOVED_CONTENT,
    REMOVED_TITLE, sort_feed,
};

/// In-memory backend with call counters, simulated latency and an
/// offline switch.
pub struct FakeBackend {
    session: Mutex<Option<Session>>,
    users: Mutex<HashMap<String, AuthUser>>,
    events: broadcast::Sender<AuthEvent>,
    calls: Mutex<HashMap<&'static str, usize>>,
    offline: AtomicBool,
    admin: AtomicBool,
    latency: Mutex<Duration>,
    pub profiles: Mutex<HashMap<Uuid, Profile>>,
    pub messages: Mutex<Vec<Message>>,
    pub posts: Mutex<Vec<Post>>,
    likes: Mutex<HashSet<(Uuid, Uuid)>>,
    comments: Mutex<Vec<Comment>>,
    failing_buckets: Mutex<HashSet<String>>,
    subscribers: Mutex<Vec<(ChangeFilter, mpsc::UnboundedSender<Change>)>>,
}

fn api_error(status: u16, code: &str) -> BackendError {
    BackendError::Api {
        status,
        code: code.into(),
        message: code.replace('_', " "),
    }
}

fn session_for(user: &AuthUser) -> Session {
    Session {
        access_token: Uuid::new_v4().to_string(),
        refresh_token: Uuid::new_v4().to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        user: user.clone(),
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            session: Mutex::new(None),
            users: Mutex::new(HashMap::new()),
            events,
            calls: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            admin: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            profiles: Mutex::new(HashMap::new()),
            messages: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            likes: Mutex::new(HashSet::new()),
            comments: Mutex::new(Vec::new()),
            failing_buckets: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// A registered identity, without a profile row.
    pub fn user(&self, email: &str) -> AuthUser {
        self.users
            .lock()
            .unwrap()
            .entry(email.to_string())
            .or_insert_with(|| AuthUser {
                id: Uuid::new_v4(),
                email: email.to_string(),
                full_name: None,
            })
            .clone()
    }

    /// A registered identity with an active profile row.
    pub fn member(&self, email: &str, full_name: &str) -> AuthUser {
        let user = self.user(email);
        let mut profile = Profile::default_for(user.id, email);
        profile.full_name = Some(full_name.to_string());
        self.profiles.lock().unwrap().insert(user.id, profile);
        user
    }

    /// Make `user` the session owner without emitting an auth event.
    pub fn sign_in_as(&self, user: &AuthUser) -> Session {
        let session = session_for(user);
        *self.session.lock().unwrap() = Some(session.clone());
        session
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().get(call).copied().unwrap_or(0)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_admin(&self, admin: bool) {
        self.admin.store(admin, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn fail_bucket(&self, bucket: &str) {
        self.failing_buckets.lock().unwrap().insert(bucket.to_string());
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|(_, tx)| !tx.is_closed());
        subs.len()
    }

    /// Drop every realtime subscriber, as a server restart would.
    pub fn close_feeds(&self) {
        self.subscribers.lock().unwrap().clear();
    }

    /// Store a message from `sender` and push it to matching subscribers,
    /// as if another member had sent it.
    pub fn deliver(&self, sender: Uuid, receiver: Uuid, content: &str) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            content: content.to_string(),
            sender_id: sender,
            receiver_id: receiver,
            created_at: Utc::now(),
            is_read: false,
        };
        self.messages.lock().unwrap().push(message.clone());
        self.publish(Change::MessageInsert(message.clone()));
        message
    }

    pub fn seed_post(&self, author: Uuid, content: &str) -> Post {
        let post = Post {
            id: Uuid::new_v4(),
            content: content.to_string(),
            title: Some("Título".into()),
            category_id: None,
            community_id: None,
            author_id: author,
            media_data: vec![],
            poll_data: None,
            is_pinned: false,
            likes_count: 0,
            comments_count: 0,
            created_at: Utc::now(),
        };
        self.posts.lock().unwrap().push(post.clone());
        post
    }

    fn publish(&self, change: Change) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|(filter, tx)| !filter.matches(&change) || tx.send(change.clone()).is_ok());
    }

    fn me(&self) -> Result<Uuid, BackendError> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.user.id)
            .ok_or(BackendError::NotAuthenticated)
    }

    /// Count the call, wait out the latency and fail when offline.
    async fn roundtrip(&self, call: &'static str) -> Result<(), BackendError> {
        *self.calls.lock().unwrap().entry(call).or_default() += 1;
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.roundtrip("get_session").await?;
        Ok(self.session.lock().unwrap().clone())
    }

    async fn refresh_session(&self) -> Result<Option<Session>, BackendError> {
        self.roundtrip("refresh_session").await?;
        let refreshed = {
            let mut session = self.session.lock().unwrap();
            let Some(current) = session.as_ref() else {
                return Ok(None);
            };
            let refreshed = session_for(&current.user);
            *session = Some(refreshed.clone());
            refreshed
        };
        let _ = self.events.send(AuthEvent::TokenRefreshed(refreshed.clone()));
        Ok(Some(refreshed))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        self.roundtrip("sign_in").await?;
        if password == "wrong" {
            return Err(api_error(401, "invalid_credentials"));
        }
        let user = self.user(email);
        let session = self.sign_in_as(&user);
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        full_name: Option<&str>,
    ) -> Result<Session, BackendError> {
        self.roundtrip("sign_up").await?;
        if self.users.lock().unwrap().contains_key(email) {
            return Err(api_error(409, "email_taken"));
        }
        let mut user = self.user(email);
        user.full_name = full_name.map(str::to_string);
        let session = self.sign_in_as(&user);
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.roundtrip("sign_out").await?;
        *self.session.lock().unwrap() = None;
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl TableBackend for FakeBackend {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, BackendError> {
        self.roundtrip("get_profile").await?;
        Ok(self.profiles.lock().unwrap().get(&id).cloned())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<Profile>, BackendError> {
        self.roundtrip("update_profile").await?;
        let mut profiles = self.profiles.lock().unwrap();
        Ok(profiles.get_mut(&id).map(|p| {
            p.apply(patch);
            p.clone()
        }))
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, BackendError> {
        self.roundtrip("upsert_profile").await?;
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.id, profile.clone());
        Ok(profile.clone())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, BackendError> {
        self.roundtrip("list_contacts").await?;
        let me = self.me()?;
        let messages = self.messages.lock().unwrap();
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.id != me && p.active)
            .map(|p| {
                let mut contact = Contact::new(p.clone());
                contact.unread_count = messages
                    .iter()
                    .filter(|m| m.sender_id == p.id && m.receiver_id == me && !m.is_read)
                    .count() as u32;
                contact
            })
            .collect())
    }

    async fn get_conversation(&self, other: Uuid) -> Result<Vec<Message>, BackendError> {
        self.roundtrip("get_conversation").await?;
        let me = self.me()?;
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.is_between(me, other))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn send_message(&self, receiver: Uuid, content: &str) -> Result<Message, BackendError> {
        self.roundtrip("send_message").await?;
        let me = self.me()?;
        if !self.profiles.lock().unwrap().contains_key(&receiver) {
            return Err(api_error(404, "not_found"));
        }
        Ok(self.deliver(me, receiver, content))
    }

    async fn mark_read(&self, other: Uuid) -> Result<u64, BackendError> {
        self.roundtrip("mark_read").await?;
        let me = self.me()?;
        let mut updated = 0;
        for m in self.messages.lock().unwrap().iter_mut() {
            if m.sender_id == other && m.receiver_id == me && !m.is_read {
                m.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, BackendError> {
        self.roundtrip("list_posts").await?;
        let mut posts: Vec<Post> = self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| query.community_id.is_none_or(|c| p.community_id == Some(c)))
            .filter(|p| query.category_id.is_none_or(|c| p.category_id == Some(c)))
            .cloned()
            .collect();
        sort_feed(&mut posts);
        if let Some(limit) = query.limit {
            posts.truncate(limit as usize);
        }
        Ok(posts)
    }

    async fn create_post(&self, req: &CreatePostRequest) -> Result<Post, BackendError> {
        self.roundtrip("create_post").await?;
        let mut post = self.seed_post(self.me()?, &req.content);
        post.title = req.title.clone();
        post.media_data = req.media_data.clone();
        post.poll_data = req.poll_data.clone();
        let mut posts = self.posts.lock().unwrap();
        if let Some(stored) = posts.iter_mut().find(|p| p.id == post.id) {
            *stored = post.clone();
        }
        Ok(post)
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), BackendError> {
        self.roundtrip("delete_post").await?;
        let me = self.me()?;
        let mut posts = self.posts.lock().unwrap();
        match posts.iter().position(|p| p.id == id) {
            Some(at) if posts[at].author_id == me => {
                posts.remove(at);
                Ok(())
            }
            Some(_) => Err(api_error(403, "forbidden")),
            None => Err(api_error(404, "not_found")),
        }
    }

    async fn soft_delete_post(&self, id: Uuid) -> Result<Post, BackendError> {
        self.roundtrip("soft_delete_post").await?;
        if !self.admin.load(Ordering::SeqCst) {
            return Err(api_error(403, "forbidden"));
        }
        let mut posts = self.posts.lock().unwrap();
        let post = posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| api_error(404, "not_found"))?;
        post.content = REMOVED_CONTENT.to_string();
        post.title = Some(REMOVED_TITLE.to_string());
        Ok(post.clone())
    }

    async fn toggle_pin(&self, id: Uuid) -> Result<Post, BackendError> {
        self.roundtrip("toggle_pin").await?;
        let mut posts = self.posts.lock().unwrap();
        let post = posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| api_error(404, "not_found"))?;
        post.is_pinned = !post.is_pinned;
        Ok(post.clone())
    }

    async fn toggle_like(&self, id: Uuid) -> Result<LikeResponse, BackendError> {
        self.roundtrip("toggle_like").await?;
        let me = self.me()?;
        let mut likes = self.likes.lock().unwrap();
        let liked = if likes.remove(&(id, me)) {
            false
        } else {
            likes.insert((id, me));
            true
        };
        let likes_count = likes.iter().filter(|(post, _)| *post == id).count() as u32;
        if let Some(post) = self.posts.lock().unwrap().iter_mut().find(|p| p.id == id) {
            post.likes_count = likes_count;
        }
        Ok(LikeResponse { liked, likes_count })
    }

    async fn list_comments(&self, post: Uuid) -> Result<Vec<Comment>, BackendError> {
        self.roundtrip("list_comments").await?;
        Ok(self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect())
    }

    async fn create_comment(&self, post: Uuid, content: &str) -> Result<Comment, BackendError> {
        self.roundtrip("create_comment").await?;
        let comment = Comment {
            id: Uuid::new_v4(),
            post_id: post,
            author_id: self.me()?,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.comments.lock().unwrap().push(comment.clone());
        Ok(comment)
    }

    async fn vote(&self, post: Uuid, option: usize) -> Result<PollData, BackendError> {
        self.roundtrip("vote").await?;
        let mut posts = self.posts.lock().unwrap();
        let poll = posts
            .iter_mut()
            .find(|p| p.id == post)
            .and_then(|p| p.poll_data.as_mut())
            .ok_or_else(|| api_error(400, "bad_request"))?;
        let choice = poll
            .options
            .get_mut(option)
            .ok_or_else(|| api_error(400, "bad_request"))?;
        choice.votes += 1;
        Ok(poll.clone())
    }

    async fn admin_status(&self) -> Result<bool, BackendError> {
        self.roundtrip("admin_status").await?;
        self.me()?;
        Ok(self.admin.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl RealtimeBackend for FakeBackend {
    async fn subscribe(
        &self,
        topic: &str,
        filter: ChangeFilter,
    ) -> Result<Subscription, BackendError> {
        self.roundtrip("subscribe").await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push((filter, tx));
        Ok(Subscription::new(topic, rx, None))
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, BackendError> {
        self.roundtrip("upload").await?;
        if self.failing_buckets.lock().unwrap().contains(bucket) {
            return Err(api_error(404, "not_found"));
        }
        Ok(format!("http://brabas.test/storage/public/{bucket}/{path}"))
    }
}
