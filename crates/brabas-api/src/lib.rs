pub mod admin;
pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod profiles;
pub mod storage;
pub mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use tracing::error;

use brabas_db::Database;
use brabas_gateway::dispatcher::Dispatcher;

use crate::error::ApiError;

/// Largest object accepted by the storage endpoint.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    /// Emergency admin override. Every use is logged.
    pub admin_emails: Vec<String>,
    pub storage_dir: PathBuf,
    pub storage_buckets: Vec<String>,
    /// Base URL used to build public object URLs.
    pub public_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".into(),
            access_token_ttl: chrono::Duration::hours(1),
            refresh_token_ttl: chrono::Duration::days(30),
            admin_emails: vec![],
            storage_dir: PathBuf::from("storage"),
            storage_buckets: vec!["media".into(), "avatars".into(), "posts".into()],
            public_url: "http://localhost:3000".into(),
        }
    }
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub config: ApiConfig,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(db: Database, config: ApiConfig, dispatcher: Dispatcher) -> AppState {
        Arc::new(Self {
            db,
            config,
            dispatcher,
        })
    }
}

/// Run a blocking database closure off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// REST surface of the backend. The realtime socket and public storage
/// files are mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(auth::sign_up))
        .route("/auth/token", post(auth::sign_in))
        .route("/auth/refresh", post(auth::refresh))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::sign_out))
        .route("/auth/user", get(auth::current_user))
        .route(
            "/profiles/{id}",
            get(profiles::get_profile)
                .patch(profiles::update_profile)
                .put(profiles::upsert_profile),
        )
        .route("/contacts", get(messages::list_contacts))
        .route("/messages", post(messages::send_message))
        .route("/messages/{other_id}", get(messages::get_conversation))
        .route("/messages/{other_id}/read", post(messages::mark_read))
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route("/posts/{id}", delete(posts::delete_post))
        .route("/posts/{id}/soft-delete", post(posts::soft_delete_post))
        .route("/posts/{id}/pin", post(posts::toggle_pin))
        .route("/posts/{id}/like", post(posts::toggle_like))
        .route(
            "/posts/{id}/comments",
            get(posts::list_comments).post(posts::create_comment),
        )
        .route("/posts/{id}/poll/vote", post(posts::vote))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read", post(notifications::mark_all_read))
        .route("/admin/me", get(admin::me))
        .route("/admin/profiles", get(admin::list_profiles))
        .route("/admin/users", post(admin::create_user))
        .route("/admin/profiles/{id}/active", put(admin::set_active))
        .route("/admin/roles", post(admin::grant_role))
        .route(
            "/storage/{bucket}/{*path}",
            put(storage::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
