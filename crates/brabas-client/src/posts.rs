//! Feed operations. The service keeps the last fetched feed in memory and
//! re-sorts it after every change (pinned first, newest first).

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use brabas_types::api::{AuthUser, CreatePostRequest, LikeResponse, PostQuery};
use brabas_types::models::{Comment, PollData, Post, sort_feed};

use crate::admin::AdminPolicy;
use crate::backend::TableBackend;
use crate::error::ClientError;
use crate::offline::{OfflineAction, OfflineQueue};
use crate::upload::{MediaFile, MediaUploader};

#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub content: String,
    pub title: Option<String>,
    pub category_id: Option<Uuid>,
    pub community_id: Option<Uuid>,
    pub attachments: Vec<MediaFile>,
    pub poll: Option<PollData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    Created(Post),
    /// The backend was unreachable; the post waits in the offline queue.
    Queued,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The author's own post, gone for good.
    Deleted,
    /// Removed by moderation; the row stays with placeholder content.
    Removed(Post),
}

pub struct PostService {
    backend: Arc<dyn TableBackend>,
    uploader: Arc<MediaUploader>,
    admin: Arc<dyn AdminPolicy>,
    offline: Arc<OfflineQueue>,
    feed: Mutex<Vec<Post>>,
}

impl PostService {
    pub fn new(
        backend: Arc<dyn TableBackend>,
        uploader: Arc<MediaUploader>,
        admin: Arc<dyn AdminPolicy>,
        offline: Arc<OfflineQueue>,
    ) -> Self {
        Self {
            backend,
            uploader,
            admin,
            offline,
            feed: Mutex::new(Vec::new()),
        }
    }

    fn feed_mut(&self) -> MutexGuard<'_, Vec<Post>> {
        self.feed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn feed(&self) -> Vec<Post> {
        self.feed_mut().clone()
    }

    /// Replace `post` in the feed (or add it) and restore feed order.
    fn put(&self, post: Post) {
        let mut feed = self.feed_mut();
        match feed.iter_mut().find(|p| p.id == post.id) {
            Some(existing) => *existing = post,
            None => feed.push(post),
        }
        sort_feed(&mut feed);
    }

    fn edit(&self, id: Uuid, f: impl FnOnce(&mut Post)) {
        if let Some(post) = self.feed_mut().iter_mut().find(|p| p.id == id) {
            f(post);
        }
    }

    /// No matching posts is an empty feed, not an error.
    pub async fn fetch_posts(&self, query: &PostQuery) -> Result<Vec<Post>, ClientError> {
        let mut posts = self.backend.list_posts(query).await?;
        sort_feed(&mut posts);
        debug!("Fetched {} posts", posts.len());
        *self.feed_mut() = posts.clone();
        Ok(posts)
    }

    pub async fn create_post(
        &self,
        author: &AuthUser,
        draft: PostDraft,
    ) -> Result<Published, ClientError> {
        let content = draft.content.trim().to_string();
        if content.is_empty() && draft.attachments.is_empty() {
            return Err(ClientError::Validation(
                "Escreva algo ou anexe uma mídia.".into(),
            ));
        }

        let media_data = self.uploader.upload_all(author.id, draft.attachments).await;
        let req = CreatePostRequest {
            content,
            title: draft.title.filter(|t| !t.trim().is_empty()),
            category_id: draft.category_id,
            community_id: draft.community_id,
            media_data,
            poll_data: draft.poll,
        };

        match self.backend.create_post(&req).await {
            Ok(post) => {
                info!("Post {} published", post.id);
                self.put(post.clone());
                Ok(Published::Created(post))
            }
            Err(e) if e.is_network() => {
                warn!("Offline, queueing post: {}", e);
                self.offline.enqueue(OfflineAction::CreatePost(req));
                Ok(Published::Queued)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Authors delete their own posts; admins remove anyone's by replacing
    /// its content, keeping comments and likes attached.
    pub async fn delete_post(
        &self,
        user: &AuthUser,
        post: &Post,
    ) -> Result<DeleteOutcome, ClientError> {
        if post.author_id == user.id {
            self.backend.delete_post(post.id).await?;
            self.feed_mut().retain(|p| p.id != post.id);
            return Ok(DeleteOutcome::Deleted);
        }
        if !self.admin.is_admin(user).await {
            return Err(ClientError::Forbidden);
        }
        let removed = self.backend.soft_delete_post(post.id).await?;
        info!("Post {} removed by moderation", post.id);
        self.put(removed.clone());
        Ok(DeleteOutcome::Removed(removed))
    }

    pub async fn toggle_pin(&self, user: &AuthUser, id: Uuid) -> Result<Post, ClientError> {
        if !self.admin.is_admin(user).await {
            return Err(ClientError::Forbidden);
        }
        let post = self.backend.toggle_pin(id).await?;
        self.put(post.clone());
        Ok(post)
    }

    pub async fn toggle_like(&self, id: Uuid) -> Result<LikeResponse, ClientError> {
        let like = self.backend.toggle_like(id).await?;
        self.edit(id, |p| p.likes_count = like.likes_count);
        Ok(like)
    }

    pub async fn vote(&self, id: Uuid, option: usize) -> Result<PollData, ClientError> {
        let poll = self.backend.vote(id, option).await?;
        self.edit(id, |p| p.poll_data = Some(poll.clone()));
        Ok(poll)
    }

    pub async fn comments(&self, id: Uuid) -> Result<Vec<Comment>, ClientError> {
        Ok(self.backend.list_comments(id).await?)
    }

    pub async fn add_comment(&self, id: Uuid, content: &str) -> Result<Comment, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation(
                "O comentário não pode ficar vazio.".into(),
            ));
        }
        let comment = self.backend.create_comment(id, content).await?;
        self.edit(id, |p| p.comments_count += 1);
        Ok(comment)
    }
}
