use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use brabas_types::api::Claims;
use brabas_types::models::{Profile, ProfilePatch};

use crate::error::ApiError;
use crate::{AppState, with_db};

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = with_db(&state, move |db| db.get_profile(&id.to_string()))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(profile))
}

/// Partial update. 404 when no row exists so the caller can fall back to
/// an upsert.
pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<ProfilePatch>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.sub != id {
        return Err(ApiError::Forbidden);
    }
    let profile = with_db(&state, move |db| db.update_profile(&id.to_string(), &patch))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(profile))
}

pub async fn upsert_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(mut profile): Json<Profile>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.sub != id || profile.id != id {
        return Err(ApiError::Forbidden);
    }
    if profile.email.is_none() {
        profile.email = Some(claims.email.clone());
    }
    let stored = with_db(&state, move |db| db.upsert_profile(&profile)).await?;
    Ok(Json(stored))
}
