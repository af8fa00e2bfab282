use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use brabas_types::api::{
    Claims, CreateCommentRequest, CreatePostRequest, LikeResponse, PostQuery, VoteRequest,
};
use brabas_types::models::{Comment, NotificationKind, PollData, Post};

use crate::admin::require_admin;
use crate::error::ApiError;
use crate::notifications::{extract_mentions, notify};
use crate::{AppState, with_db};

const MAX_POST_CHARS: usize = 10_000;
const MAX_COMMENT_CHARS: usize = 2_000;
const MAX_POLL_OPTIONS: usize = 10;

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PostQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let posts = with_db(&state, move |db| db.list_posts(&query)).await?;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("post content is required".into()));
    }
    if content.chars().count() > MAX_POST_CHARS {
        return Err(ApiError::BadRequest("post is too long".into()));
    }
    let poll_data = req.poll_data.map(validate_poll).transpose()?;

    let post = Post {
        id: Uuid::new_v4(),
        content,
        title: req
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        category_id: req.category_id,
        community_id: req.community_id,
        author_id: claims.sub,
        media_data: req.media_data,
        poll_data,
        is_pinned: false,
        likes_count: 0,
        comments_count: 0,
        created_at: Utc::now(),
    };

    let stored = post.clone();
    with_db(&state, move |db| db.insert_post(&stored)).await?;
    info!("{} published post {}", claims.sub, post.id);

    let mentions = extract_mentions(&post.content);
    if !mentions.is_empty() {
        let mentioned = with_db(&state, move |db| db.profile_ids_by_usernames(&mentions)).await?;
        for id in mentioned.iter().filter_map(|id| id.parse::<Uuid>().ok()) {
            notify(
                &state,
                id,
                claims.sub,
                NotificationKind::Mention,
                Some(post.id),
                "Você foi mencionada em um post".into(),
            )
            .await;
        }
    }

    Ok((StatusCode::CREATED, Json(post)))
}

/// Physical delete, only for the author. Likes, comments and votes go with it.
pub async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let post = load_post(&state, id).await?;
    if post.author_id != claims.sub {
        return Err(ApiError::Forbidden);
    }

    let deleted = with_db(&state, move |db| db.delete_post(&id.to_string())).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    info!("{} deleted post {}", claims.sub, id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn soft_delete_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &claims).await?;

    let post = with_db(&state, move |db| db.soft_delete_post(&id.to_string()))
        .await?
        .ok_or(ApiError::NotFound)?;
    info!("{} removed post {} (moderation)", claims.sub, id);
    Ok(Json(post))
}

pub async fn toggle_pin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &claims).await?;

    let post = with_db(&state, move |db| db.toggle_pin(&id.to_string()))
        .await?
        .ok_or(ApiError::NotFound)?;
    info!("{} set post {} pinned={}", claims.sub, id, post.is_pinned);
    Ok(Json(post))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let outcome = with_db(&state, move |db| db.toggle_like(&id.to_string(), &uid))
        .await?
        .ok_or(ApiError::NotFound)?;
    debug!("{} liked={} post {}", claims.sub, outcome.liked, id);

    if outcome.liked {
        let post = load_post(&state, id).await?;
        notify(
            &state,
            post.author_id,
            claims.sub,
            NotificationKind::Like,
            Some(id),
            "Seu post recebeu uma curtida".into(),
        )
        .await;
    }

    Ok(Json(LikeResponse {
        liked: outcome.liked,
        likes_count: outcome.likes_count,
    }))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    load_post(&state, id).await?;
    let comments = with_db(&state, move |db| db.list_comments(&id.to_string())).await?;
    Ok(Json(comments))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("comment is empty".into()));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::BadRequest("comment is too long".into()));
    }

    let post = load_post(&state, id).await?;
    let comment = Comment {
        id: Uuid::new_v4(),
        post_id: id,
        author_id: claims.sub,
        content,
        created_at: Utc::now(),
    };
    let stored = comment.clone();
    with_db(&state, move |db| db.insert_comment(&stored)).await?;

    notify(
        &state,
        post.author_id,
        claims.sub,
        NotificationKind::Comment,
        Some(id),
        "Seu post recebeu um comentário".into(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(comment)))
}

/// Cast or move the caller's vote; returns the recomputed poll.
pub async fn vote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post = load_post(&state, id).await?;
    let Some(poll) = post.poll_data else {
        return Err(ApiError::BadRequest("post has no poll".into()));
    };
    if req.option >= poll.options.len() {
        return Err(ApiError::BadRequest("poll option out of range".into()));
    }

    let uid = claims.sub.to_string();
    let option = req.option;
    let poll = with_db(&state, move |db| db.vote_poll(&id.to_string(), &uid, option))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(poll))
}

async fn load_post(state: &AppState, id: Uuid) -> Result<Post, ApiError> {
    with_db(state, move |db| db.get_post(&id.to_string()))
        .await?
        .ok_or(ApiError::NotFound)
}

/// Polls need a question and at least two distinct non-empty options.
/// Client-supplied tallies are discarded.
fn validate_poll(mut poll: PollData) -> Result<PollData, ApiError> {
    poll.question = poll.question.trim().to_string();
    if poll.question.is_empty() {
        return Err(ApiError::BadRequest("poll question is required".into()));
    }
    for option in &mut poll.options {
        option.text = option.text.trim().to_string();
        option.votes = 0;
    }
    poll.options.retain(|o| !o.text.is_empty());
    if poll.options.len() < 2 {
        return Err(ApiError::BadRequest("poll needs at least two options".into()));
    }
    if poll.options.len() > MAX_POLL_OPTIONS {
        return Err(ApiError::BadRequest("poll has too many options".into()));
    }
    Ok(poll)
}
