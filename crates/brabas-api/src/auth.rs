use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use brabas_types::api::{AuthUser, Claims, RefreshRequest, Session, SignInRequest, SignUpRequest};

use crate::error::ApiError;
use crate::{AppState, with_db};

const MIN_PASSWORD_LEN: usize = 6;

pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = register_identity(&state, &req.email, &req.password, req.full_name.as_deref()).await?;
    let session = issue_session(&state, user).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;

    let user = with_db(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|_| ApiError::Internal)?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::InvalidCredentials)?;

    ensure_active(&state, &user.id).await?;

    let session = issue_session(
        &state,
        AuthUser {
            id: user.id.parse().map_err(|_| ApiError::Internal)?,
            email: user.email,
            full_name: user.full_name,
        },
    )
    .await?;
    Ok(Json(session))
}

/// Rotate a refresh token into a new session.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token_hash = hash_token(&req.refresh_token);
    let user = with_db(&state, move |db| db.redeem_refresh_token(&token_hash))
        .await?
        .ok_or(ApiError::InvalidRefreshToken)?;

    ensure_active(&state, &user.id).await?;

    let session = issue_session(
        &state,
        AuthUser {
            id: user.id.parse().map_err(|_| ApiError::Internal)?,
            email: user.email,
            full_name: user.full_name,
        },
    )
    .await?;
    Ok(Json(session))
}

pub async fn sign_out(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let revoked = with_db(&state, move |db| db.revoke_refresh_tokens(&uid)).await?;
    info!("{} signed out ({} refresh tokens revoked)", claims.sub, revoked);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let user = with_db(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(AuthUser {
        id: claims.sub,
        email: user.email,
        full_name: user.full_name,
    }))
}

/// Create a password identity. A profile already provisioned for this
/// email (by the payment webhook) lends its id to the new identity.
pub(crate) async fn register_identity(
    state: &AppState,
    email: &str,
    password: &str,
    full_name: Option<&str>,
) -> Result<AuthUser, ApiError> {
    let email = normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must have at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let full_name = full_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let lookup = email.clone();
    let (existing_user, provisioned) = with_db(state, move |db| {
        Ok((
            db.get_user_by_email(&lookup)?,
            db.get_profile_row_by_email(&lookup)?,
        ))
    })
    .await?;

    if existing_user.is_some() {
        return Err(ApiError::EmailTaken);
    }

    let user_id = match provisioned {
        Some(row) => row.id.parse().map_err(|_| ApiError::Internal)?,
        None => Uuid::new_v4(),
    };

    let password_hash = hash_password(password)?;

    let (uid, mail, name) = (user_id.to_string(), email.clone(), full_name.clone());
    with_db(state, move |db| {
        db.create_user(&uid, &mail, &password_hash, name.as_deref())
    })
    .await?;

    info!("Registered {} as {}", email, user_id);
    Ok(AuthUser {
        id: user_id,
        email,
        full_name,
    })
}

pub(crate) fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| ApiError::Internal)
}

pub(crate) fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::BadRequest("invalid email".into())),
    }
}

async fn ensure_active(state: &AppState, user_id: &str) -> Result<(), ApiError> {
    let uid = user_id.to_string();
    let profile = with_db(state, move |db| db.get_profile(&uid)).await?;
    match profile {
        Some(p) if !p.active => Err(ApiError::AccountInactive),
        _ => Ok(()),
    }
}

async fn issue_session(state: &AppState, user: AuthUser) -> Result<Session, ApiError> {
    let config = &state.config;
    let expires_at = Utc::now() + config.access_token_ttl;

    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        exp: expires_at.timestamp() as usize,
    };
    let access_token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| ApiError::Internal)?;

    let mut raw = [0u8; 32];
    rand::rng().fill_bytes(&mut raw);
    let refresh_token = B64.encode(raw);

    let token_hash = hash_token(&refresh_token);
    let uid = user.id.to_string();
    let refresh_expires = Utc::now() + config.refresh_token_ttl;
    with_db(state, move |db| {
        db.store_refresh_token(&token_hash, &uid, refresh_expires)
    })
    .await?;

    Ok(Session {
        access_token,
        refresh_token,
        expires_at,
        user,
    })
}

/// Refresh tokens are only ever stored as digests.
fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
