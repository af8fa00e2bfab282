use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder written over a post's content when a moderator removes it.
pub const REMOVED_CONTENT: &str = "[Conteúdo removido pela moderação]";
/// Placeholder written over a post's title when a moderator removes it.
pub const REMOVED_TITLE: &str = "[Removido]";

fn default_active() -> bool {
    true
}

/// A member profile. One-to-one with an authenticated identity, except for
/// profiles provisioned by the payment webhook before the buyer signs up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// The profile a brand new member gets: username taken from the local
    /// part of their email.
    pub fn default_for(id: Uuid, email: &str) -> Self {
        Self {
            id,
            email: Some(email.to_string()),
            full_name: None,
            avatar_url: None,
            bio: None,
            username: Some(username_from_email(email)),
            headline: None,
            location: None,
            language: Some("pt-BR".to_string()),
            timezone: Some("America/Sao_Paulo".to_string()),
            active: true,
            updated_at: Some(Utc::now()),
        }
    }

    /// Best name to show for this profile.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .or(self.email.as_deref())
            .unwrap_or("Membro")
    }

    /// Apply the fields present in `patch`, leaving the rest untouched.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        let ProfilePatch {
            full_name,
            avatar_url,
            bio,
            username,
            headline,
            location,
            language,
            timezone,
        } = patch;

        for (slot, value) in [
            (&mut self.full_name, full_name),
            (&mut self.avatar_url, avatar_url),
            (&mut self.bio, bio),
            (&mut self.username, username),
            (&mut self.headline, headline),
            (&mut self.location, location),
            (&mut self.language, language),
            (&mut self.timezone, timezone),
        ] {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }
        self.updated_at = Some(Utc::now());
    }
}

/// `maria.silva+club@x.com` -> `maria.silva`
pub fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let local = local.split('+').next().unwrap_or_default();
    let cleaned: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if cleaned.is_empty() {
        "membro".to_string()
    } else {
        cleaned.to_lowercase()
    }
}

/// The writable subset of a profile. Only columns that exist in the
/// `profiles` table are representable; absent fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl ProfilePatch {
    /// Build a patch from an arbitrary form object. Unknown keys and
    /// `null`/non-string values are dropped.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            full_name: field("full_name"),
            avatar_url: field("avatar_url"),
            bio: field("bio"),
            username: field("username"),
            headline: field("headline"),
            location: field("location"),
            language: field("language"),
            timezone: field("timezone"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A direct message. Append-only; only `is_read` ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// True if this message belongs to the conversation between `a` and `b`.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// The other party of the conversation, seen from `me`.
    pub fn counterpart(&self, me: Uuid) -> Uuid {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// A profile annotated with messaging state. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(flatten)]
    pub profile: Profile,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            unread_count: 0,
            last_message: None,
            last_message_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.profile.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else {
            Self::File
        }
    }
}

/// One attachment of a post. `inline` marks a `data:` URL produced when
/// object storage was unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    #[serde(default)]
    pub votes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollData {
    pub question: String,
    pub options: Vec<PollOption>,
}

impl PollData {
    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.votes).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub community_id: Option<Uuid>,
    pub author_id: Uuid,
    #[serde(default)]
    pub media_data: Vec<MediaItem>,
    #[serde(default)]
    pub poll_data: Option<PollData>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub comments_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Feed order: pinned first, newest first within each group.
    pub fn feed_order(a: &Post, b: &Post) -> Ordering {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| b.created_at.cmp(&a.created_at))
    }

    pub fn is_removed(&self) -> bool {
        self.content == REMOVED_CONTENT
    }
}

pub fn sort_feed(posts: &mut [Post]) {
    posts.sort_by(Post::feed_order);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Mention,
    Message,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Mention => "mention",
            Self::Message => "message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "comment" => Some(Self::Comment),
            "mention" => Some(Self::Mention),
            "message" => Some(Self::Message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub actor_id: Uuid,
    pub kind: NotificationKind,
    #[serde(default)]
    pub post_id: Option<Uuid>,
    pub body: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
