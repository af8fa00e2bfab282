//! Payment-provider webhook. Approved purchases of a recognized product
//! provision (or reactivate) a member profile, cancellations deactivate it.
//!
//! Served by the standalone `brabas-webhook` binary, sharing the backend's
//! database file.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use brabas_db::Database;
use brabas_db::queries::NewMember;
use brabas_types::api::{WebhookPayload, WebhookResponse};
use brabas_types::models::username_from_email;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

const APPROVED: &[&str] = &["approved", "authorized", "paid", "completed"];
const CANCELED: &[&str] = &[
    "refunded",
    "canceled",
    "cancelled",
    "chargeback",
    "chargedback",
    "expired",
];

/// What a provider status means for the buyer's membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Approved,
    Canceled,
    Other,
}

impl PaymentStatus {
    pub fn classify(raw: &str) -> Self {
        let status = raw.trim().to_lowercase();
        if APPROVED.contains(&status.as_str()) {
            Self::Approved
        } else if CANCELED.contains(&status.as_str()) {
            Self::Canceled
        } else {
            Self::Other
        }
    }
}

#[derive(Clone)]
pub struct WebhookState {
    pub db: Arc<Database>,
    /// HMAC-SHA256 signing secret. Unsigned requests are accepted when unset.
    pub secret: Option<String>,
    /// Product ids that grant membership.
    pub products: Vec<String>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/webhook/{provider}", post(receive))
        .with_state(state)
}

fn reply(status: StatusCode, success: bool, message: impl Into<String>) -> Response {
    (
        status,
        Json(WebhookResponse {
            success,
            message: message.into(),
        }),
    )
        .into_response()
}

async fn receive(
    State(state): State<WebhookState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("[{}] rejected webhook with a bad signature", provider);
            return reply(StatusCode::UNAUTHORIZED, false, "invalid signature");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!("[{}] malformed webhook body: {}", provider, e);
            return reply(StatusCode::BAD_REQUEST, false, "malformed JSON body");
        }
    };

    let Some(status) = payload.status.as_deref().filter(|s| !s.trim().is_empty()) else {
        return reply(StatusCode::BAD_REQUEST, false, "missing status");
    };
    let buyer = payload.buyer.clone().unwrap_or_default();
    let Some(email) = buyer
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| e.contains('@'))
    else {
        return reply(StatusCode::BAD_REQUEST, false, "missing buyer email");
    };

    let recognized = payload
        .items
        .iter()
        .filter_map(|item| item.product_id())
        .any(|id| state.products.contains(&id));

    info!("[{}] {} for {} (recognized product: {})", provider, status, email, recognized);

    let outcome = match PaymentStatus::classify(status) {
        PaymentStatus::Approved if recognized => {
            let db = state.db.clone();
            let (name, phone) = (buyer.name.clone(), buyer.phone.clone());
            let mail = email.clone();
            tokio::task::spawn_blocking(move || {
                grant_membership(&db, &mail, name.as_deref(), phone.as_deref())
            })
            .await
        }
        PaymentStatus::Canceled => {
            let db = state.db.clone();
            let mail = email.clone();
            tokio::task::spawn_blocking(move || revoke_membership(&db, &mail)).await
        }
        _ => return reply(StatusCode::OK, true, format!("ignored status '{}'", status)),
    };

    match outcome {
        Ok(Ok(message)) => {
            info!("[{}] {}", provider, message);
            reply(StatusCode::OK, true, message)
        }
        Ok(Err(e)) => {
            error!("[{}] failed to process {} for {}: {:#}", provider, status, email, e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, "internal error")
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, "internal error")
        }
    }
}

fn grant_membership(
    db: &Database,
    email: &str,
    name: Option<&str>,
    phone: Option<&str>,
) -> anyhow::Result<String> {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    let phone = phone.map(str::trim).filter(|p| !p.is_empty());

    if let Some(existing) = db.get_profile_row_by_email(email)? {
        db.reactivate_profile(&existing.id, name, phone)?;
        return Ok(format!("profile reactivated for {}", email));
    }

    let id = Uuid::new_v4().to_string();
    let username = username_from_email(email);
    db.create_member_profile(&NewMember {
        id: &id,
        email,
        full_name: name,
        phone,
        username: &username,
    })?;
    Ok(format!("profile created for {}", email))
}

fn revoke_membership(db: &Database, email: &str) -> anyhow::Result<String> {
    match db.get_profile_row_by_email(email)? {
        Some(existing) => {
            db.set_profile_active(&existing.id, false)?;
            Ok(format!("profile deactivated for {}", email))
        }
        None => Ok(format!("no profile found for {}", email)),
    }
}

fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

async fn status_page(State(state): State<WebhookState>) -> Html<String> {
    let products = state
        .products
        .iter()
        .map(|p| format!("<li><code>{}</code></li>", p))
        .collect::<String>();
    let signing = if state.secret.is_some() { "required" } else { "disabled" };

    Html(format!(
        "<!doctype html>\n<html lang=\"pt-BR\">\n<head><meta charset=\"utf-8\">\
         <title>Clube das Brabas - Webhook</title></head>\n<body>\n\
         <h1>Webhook ativo</h1>\n\
         <p>Endpoint: <code>POST /webhook/&lt;provider&gt;</code></p>\n\
         <p>Assinatura ({}): <code>{}</code></p>\n\
         <h2>Produtos reconhecidos</h2>\n<ul>{}</ul>\n</body>\n</html>\n",
        signing, SIGNATURE_HEADER, products
    ))
}
