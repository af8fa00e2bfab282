use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use brabas_api::webhook::{self, WebhookState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brabas=debug,tower_http=debug".into()),
        )
        .init();

    let host = std::env::var("BRABAS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BRABAS_WEBHOOK_PORT")
        .unwrap_or_else(|_| "3001".into())
        .parse()?;
    let db_path: PathBuf = std::env::var("BRABAS_DB_PATH")
        .unwrap_or_else(|_| "brabas.db".into())
        .into();
    let secret = std::env::var("BRABAS_WEBHOOK_SECRET")
        .ok()
        .filter(|s| !s.is_empty());
    let products: Vec<String> = std::env::var("BRABAS_WEBHOOK_PRODUCTS")
        .unwrap_or_else(|_| "82022".into())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if secret.is_none() {
        warn!("BRABAS_WEBHOOK_SECRET is unset; accepting unsigned webhooks");
    }

    let db = Arc::new(brabas_db::Database::open(&db_path)?);
    info!("Recognized products: {}", products.join(", "));

    let app = webhook::router(WebhookState {
        db,
        secret,
        products,
    })
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Brabas webhook listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
