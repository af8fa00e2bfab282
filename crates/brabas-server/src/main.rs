mod config;

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use brabas_api::{AppState, AppStateInner};
use brabas_gateway::connection;
use brabas_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brabas=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_placeholder_secret() {
        warn!("BRABAS_JWT_SECRET is unset or a placeholder; do not run this in production");
    }
    if !config.api.admin_emails.is_empty() {
        warn!(
            "Emergency admin override enabled for {} email(s)",
            config.api.admin_emails.len()
        );
    }

    let db = brabas_db::Database::open(&config.db_path)?;
    tokio::fs::create_dir_all(&config.api.storage_dir).await?;
    let storage_dir = config.api.storage_dir.clone();

    let state = AppStateInner::new(db, config.api, Dispatcher::new());

    let realtime = Router::new()
        .route("/realtime", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(brabas_api::router(state))
        .merge(realtime)
        .nest_service("/storage/public", ServeDir::new(storage_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Brabas server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.config.jwt_secret.clone(),
        )
    })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
    }
}
