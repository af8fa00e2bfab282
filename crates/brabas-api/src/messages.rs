use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use brabas_types::api::{Claims, MarkReadResponse, SendMessageRequest};
use brabas_types::events::Change;
use brabas_types::models::{Message, NotificationKind};

use crate::error::ApiError;
use crate::notifications::notify;
use crate::{AppState, with_db};

const MAX_MESSAGE_CHARS: usize = 4000;

pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let contacts = with_db(&state, move |db| db.get_contacts(&me)).await?;
    Ok(Json(contacts))
}

/// The whole conversation with `other_id`, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (me, other) = (claims.sub.to_string(), other_id.to_string());
    let messages = with_db(&state, move |db| db.get_conversation(&me, &other)).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("message is empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest("message is too long".into()));
    }
    if req.receiver_id == claims.sub {
        return Err(ApiError::BadRequest("cannot message yourself".into()));
    }

    let message = Message {
        id: Uuid::new_v4(),
        content,
        sender_id: claims.sub,
        receiver_id: req.receiver_id,
        created_at: Utc::now(),
        is_read: false,
    };

    let stored = message.clone();
    let receiver = req.receiver_id.to_string();
    let receiver_known = with_db(&state, move |db| {
        if db.get_profile(&receiver)?.is_none() {
            return Ok(false);
        }
        db.insert_message(&stored)?;
        Ok(true)
    })
    .await?;
    if !receiver_known {
        return Err(ApiError::NotFound);
    }

    debug!("{} -> {}: message {}", message.sender_id, message.receiver_id, message.id);
    state.dispatcher.publish(Change::MessageInsert(message.clone()));

    // Members with a live connection see the message arrive; only the
    // offline ones get a notification for it.
    if !state.dispatcher.is_connected(message.receiver_id).await {
        notify(
            &state,
            message.receiver_id,
            message.sender_id,
            NotificationKind::Message,
            None,
            "Você recebeu uma nova mensagem".into(),
        )
        .await;
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// Flip `is_read` on every unread message `other_id` sent to the caller.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (me, other) = (claims.sub.to_string(), other_id.to_string());
    let updated = with_db(&state, move |db| db.mark_conversation_read(&other, &me)).await?;
    Ok(Json(MarkReadResponse { updated }))
}
