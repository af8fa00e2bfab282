use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sha2::Sha256;
use tower::ServiceExt;

use brabas_api::webhook::{self, SIGNATURE_HEADER, WebhookState};
use brabas_db::Database;

fn setup(secret: Option<&str>) -> (Router, Arc<Database>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let app = webhook::router(WebhookState {
        db: db.clone(),
        secret: secret.map(str::to_string),
        products: vec!["82022".into()],
    });
    (app, db)
}

async fn post(app: &Router, body: &str, signature: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method("POST")
        .uri("/webhook/kiwify")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        req = req.header(SIGNATURE_HEADER, sig);
    }
    let resp = app
        .clone()
        .oneshot(req.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn active(db: &Database, email: &str) -> Option<bool> {
    let row = db.get_profile_row_by_email(email).unwrap()?;
    Some(row.active)
}

#[tokio::test]
async fn purchase_then_refund_toggles_membership() {
    let (app, db) = setup(None);

    let purchase = json!({
        "status": "authorized",
        "buyer": { "email": "a@x.com", "name": "A" },
        "items": [{ "product_id": "82022" }]
    });
    let (status, body) = post(&app, &purchase.to_string(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(active(&db, "a@x.com"), Some(true));

    let refund = json!({
        "status": "refunded",
        "buyer": { "email": "a@x.com" },
        "items": [{ "product_id": "82022" }]
    });
    let (status, body) = post(&app, &refund.to_string(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(active(&db, "a@x.com"), Some(false));
}

#[tokio::test]
async fn numeric_product_ids_are_recognized() {
    let (app, db) = setup(None);
    let body = json!({
        "status": "paid",
        "buyer": { "email": "Num@X.com", "phone": "11999990000" },
        "items": [{ "product_id": 82022 }]
    });
    let (status, _) = post(&app, &body.to_string(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active(&db, "num@x.com"), Some(true));
}

#[tokio::test]
async fn unknown_products_and_statuses_are_ignored() {
    let (app, db) = setup(None);

    let other_product = json!({
        "status": "approved",
        "buyer": { "email": "b@x.com" },
        "items": [{ "product_id": "1" }]
    });
    let (status, body) = post(&app, &other_product.to_string(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let waiting = json!({
        "status": "waiting_payment",
        "buyer": { "email": "b@x.com" },
        "items": [{ "product_id": "82022" }]
    });
    let (status, body) = post(&app, &waiting.to_string(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("ignored"));

    assert_eq!(active(&db, "b@x.com"), None);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let (app, _) = setup(None);

    let (status, body) = post(&app, "{not json", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = post(&app, &json!({ "buyer": { "email": "c@x.com" } }).to_string(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, &json!({ "status": "paid", "buyer": {} }).to_string(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_webhooks_are_verified() {
    let (app, db) = setup(Some("s3cret"));
    let body = json!({
        "status": "completed",
        "buyer": { "email": "d@x.com" },
        "items": [{ "product_id": "82022" }]
    })
    .to_string();

    let (status, _) = post(&app, &body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = post(&app, &body, Some("00ff")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(active(&db, "d@x.com"), None);

    let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
    mac.update(body.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    let (status, _) = post(&app, &body, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active(&db, "d@x.com"), Some(true));
}

#[tokio::test]
async fn status_page_lists_products() {
    let (app, _) = setup(None);
    let resp = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("82022"));
    assert!(html.contains("/webhook/"));
}
