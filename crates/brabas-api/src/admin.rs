use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use brabas_types::api::{
    AdminStatus, Claims, CreateUserRequest, CreateUserResponse, GrantRoleRequest,
    SetActiveRequest,
};
use brabas_types::models::Profile;

use crate::auth::register_identity;
use crate::error::ApiError;
use crate::{AppState, with_db};

const ADMIN_ROLE: &str = "admin";
const KNOWN_ROLES: &[&str] = &["admin", "moderator", "member"];

/// The single authoritative admin check: the profile flag or an `admin`
/// role row. The configured email override is an audited emergency path.
pub async fn is_admin(state: &AppState, claims: &Claims) -> Result<bool, ApiError> {
    let uid = claims.sub.to_string();
    let (flag, roles) = with_db(state, move |db| {
        Ok((db.is_admin_flag(&uid)?, db.get_roles(&uid)?))
    })
    .await?;

    if flag || roles.iter().any(|r| r == ADMIN_ROLE) {
        return Ok(true);
    }

    let email = claims.email.to_lowercase();
    if state.config.admin_emails.iter().any(|e| e.eq_ignore_ascii_case(&email)) {
        warn!("Emergency admin override used by {} ({})", email, claims.sub);
        return Ok(true);
    }

    Ok(false)
}

pub(crate) async fn require_admin(state: &AppState, claims: &Claims) -> Result<(), ApiError> {
    if is_admin(state, claims).await? {
        Ok(())
    } else {
        warn!("{} attempted an admin action", claims.sub);
        Err(ApiError::Forbidden)
    }
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(AdminStatus {
        is_admin: is_admin(&state, &claims).await?,
    }))
}

pub async fn list_profiles(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &claims).await?;
    let profiles = with_db(&state, |db| db.list_profiles()).await?;
    Ok(Json(profiles))
}

/// Create a member on their behalf, with a ready profile.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &claims).await?;

    let user = register_identity(&state, &req.email, &req.password, req.full_name.as_deref()).await?;

    let mut profile = Profile::default_for(user.id, &user.email);
    profile.full_name = user.full_name.clone();
    let uid = user.id.to_string();
    let profile = with_db(&state, move |db| match db.get_profile(&uid)? {
        Some(existing) => Ok(existing),
        None => db.upsert_profile(&profile),
    })
    .await?;

    info!("{} created member {} ({})", claims.sub, user.email, user.id);
    Ok((StatusCode::CREATED, Json(CreateUserResponse { user, profile })))
}

pub async fn set_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &claims).await?;

    let active = req.active;
    let profile = with_db(&state, move |db| {
        if !db.set_profile_active(&id.to_string(), active)? {
            return Ok(None);
        }
        db.get_profile(&id.to_string())
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    info!("{} set {} active={}", claims.sub, id, active);
    Ok(Json(profile))
}

pub async fn grant_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GrantRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &claims).await?;

    let role = req.role.trim().to_lowercase();
    if !KNOWN_ROLES.contains(&role.as_str()) {
        return Err(ApiError::BadRequest(format!("unknown role '{}'", role)));
    }

    let uid = req.user_id.to_string();
    let granted = role.clone();
    let roles = with_db(&state, move |db| {
        if db.get_profile(&uid)?.is_none() {
            return Ok(None);
        }
        db.grant_role(&uid, &granted)?;
        db.get_roles(&uid).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    info!("{} granted role {} to {}", claims.sub, role, req.user_id);
    Ok(Json(serde_json::json!({ "user_id": req.user_id, "roles": roles })))
}
