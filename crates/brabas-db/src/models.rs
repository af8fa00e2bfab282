//! Database row types. These map directly to SQLite rows and are converted
//! into `brabas-types` entities as soon as they leave a query.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use brabas_types::models::{
    Comment, Contact, Message, Notification, NotificationKind, PollData, Post, Profile,
};

/// Timestamps are stored as fixed-width RFC 3339 so lexical order is
/// chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by sqlite's datetime('now') have no timezone.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{raw}'"))
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{raw}'"))
}

fn parse_opt_id(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_id).transpose()
}

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub created_at: String,
}

pub struct ProfileRow {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub username: Option<String>,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
    pub is_admin: bool,
    pub updated_at: Option<String>,
}

impl ProfileRow {
    pub fn into_profile(self) -> Result<Profile> {
        Ok(Profile {
            id: parse_id(&self.id)?,
            email: self.email,
            full_name: self.full_name,
            avatar_url: self.avatar_url,
            bio: self.bio,
            username: self.username,
            headline: self.headline,
            location: self.location,
            language: self.language,
            timezone: self.timezone,
            active: self.active,
            updated_at: self.updated_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

pub struct ContactRow {
    pub profile: ProfileRow,
    pub unread_count: u32,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
}

impl ContactRow {
    pub fn into_contact(self) -> Result<Contact> {
        Ok(Contact {
            profile: self.profile.into_profile()?,
            unread_count: self.unread_count,
            last_message: self.last_message,
            last_message_at: self.last_message_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: String,
    pub is_read: bool,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            content: self.content,
            sender_id: parse_id(&self.sender_id)?,
            receiver_id: parse_id(&self.receiver_id)?,
            created_at: parse_ts(&self.created_at)?,
            is_read: self.is_read,
        })
    }
}

pub struct PostRow {
    pub id: String,
    pub content: String,
    pub title: Option<String>,
    pub category_id: Option<String>,
    pub community_id: Option<String>,
    pub author_id: String,
    pub media_data: String,
    pub poll_data: Option<String>,
    pub is_pinned: bool,
    pub likes_count: u32,
    pub comments_count: u32,
    pub created_at: String,
}

impl PostRow {
    pub fn into_post(self) -> Result<Post> {
        let poll_data: Option<PollData> = self
            .poll_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(|| format!("corrupt poll_data on post '{}'", self.id))?;

        Ok(Post {
            id: parse_id(&self.id)?,
            content: self.content,
            title: self.title,
            category_id: parse_opt_id(self.category_id)?,
            community_id: parse_opt_id(self.community_id)?,
            author_id: parse_id(&self.author_id)?,
            media_data: serde_json::from_str(&self.media_data)
                .with_context(|| format!("corrupt media_data on post '{}'", self.id))?,
            poll_data,
            is_pinned: self.is_pinned,
            likes_count: self.likes_count,
            comments_count: self.comments_count,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
}

impl CommentRow {
    pub fn into_comment(self) -> Result<Comment> {
        Ok(Comment {
            id: parse_id(&self.id)?,
            post_id: parse_id(&self.post_id)?,
            author_id: parse_id(&self.author_id)?,
            content: self.content,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub actor_id: String,
    pub kind: String,
    pub post_id: Option<String>,
    pub body: String,
    pub is_read: bool,
    pub created_at: String,
}

impl NotificationRow {
    pub fn into_notification(self) -> Result<Notification> {
        let kind = NotificationKind::parse(&self.kind)
            .with_context(|| format!("unknown notification kind '{}'", self.kind))?;
        Ok(Notification {
            id: parse_id(&self.id)?,
            user_id: parse_id(&self.user_id)?,
            actor_id: parse_id(&self.actor_id)?,
            kind,
            post_id: parse_opt_id(self.post_id)?,
            body: self.body,
            is_read: self.is_read,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}
