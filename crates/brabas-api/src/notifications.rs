use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use brabas_types::api::{Claims, MarkReadResponse};
use brabas_types::events::Change;
use brabas_types::models::{Notification, NotificationKind};

use crate::error::ApiError;
use crate::{AppState, with_db};

const NOTIFICATION_PAGE: u32 = 100;

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let list = with_db(&state, move |db| db.list_notifications(&uid, NOTIFICATION_PAGE)).await?;
    Ok(Json(list))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let updated = with_db(&state, move |db| db.mark_notifications_read(&uid)).await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// Store and publish a notification. Members are never notified of their
/// own actions, and a failure here never fails the action that caused it.
pub(crate) async fn notify(
    state: &AppState,
    user_id: Uuid,
    actor_id: Uuid,
    kind: NotificationKind,
    post_id: Option<Uuid>,
    body: String,
) {
    if user_id == actor_id {
        return;
    }

    let notification = Notification {
        id: Uuid::new_v4(),
        user_id,
        actor_id,
        kind,
        post_id,
        body,
        is_read: false,
        created_at: Utc::now(),
    };

    let stored = notification.clone();
    match with_db(state, move |db| db.insert_notification(&stored)).await {
        Ok(()) => state
            .dispatcher
            .publish(Change::NotificationInsert(notification)),
        Err(e) => warn!("Dropping {} notification for {}: {}", kind.as_str(), user_id, e),
    }
}

/// `@username` tokens in a post, lowercased and deduplicated.
pub(crate) fn extract_mentions(content: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for (i, _) in content.match_indices('@') {
        // an '@' inside a word is an email address, not a mention
        let preceded_by_word = content[..i]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric());
        if preceded_by_word {
            continue;
        }
        let name: String = content[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        let name = name.trim_end_matches('.').to_lowercase();
        if !name.is_empty() && !mentions.contains(&name) {
            mentions.push(name);
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_are_extracted_once_and_emails_ignored() {
        let text = "Oi @Ana e @bia.souza! Falem com @ana. Meu email: eu@x.com";
        assert_eq!(extract_mentions(text), vec!["ana", "bia.souza"]);
    }

    #[test]
    fn lone_at_sign_is_not_a_mention() {
        assert!(extract_mentions("me encontra @ 18h").is_empty());
    }
}
