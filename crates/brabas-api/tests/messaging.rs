mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use brabas_types::models::{Contact, Message};
use common::TestApp;

async fn contacts(app: &TestApp, token: &str) -> Vec<Contact> {
    let (status, body) = app.send(Method::GET, "/contacts", Some(token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn unread_counts_drop_to_zero_after_opening_the_conversation() {
    let app = TestApp::new();
    let ana = app.member("ana@example.com", "Ana").await;
    let bia = app.member("bia@example.com", "Bia").await;

    for text in ["oi", "tudo bem?"] {
        let (status, body) = app
            .send(
                Method::POST,
                "/messages",
                Some(&ana.access_token),
                Some(json!({ "receiver_id": bia.user.id, "content": text })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let list = contacts(&app, &bia.access_token).await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id(), ana.user.id);
    assert_eq!(list[0].unread_count, 2);
    assert_eq!(list[0].last_message.as_deref(), Some("tudo bem?"));

    // the sender has nothing unread
    assert_eq!(contacts(&app, &ana.access_token).await[0].unread_count, 0);

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/messages/{}", ana.user.id),
            Some(&bia.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let conversation: Vec<Message> = serde_json::from_value(body).unwrap();
    let texts: Vec<_> = conversation.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["oi", "tudo bem?"]);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/messages/{}/read", ana.user.id),
            Some(&bia.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 2);

    let list = contacts(&app, &bia.access_token).await;
    assert_eq!(list[0].unread_count, 0);
}

#[tokio::test]
async fn offline_receivers_get_a_message_notification() {
    let app = TestApp::new();
    let ana = app.member("ana@example.com", "Ana").await;
    let bia = app.member("bia@example.com", "Bia").await;

    app.send(
        Method::POST,
        "/messages",
        Some(&ana.access_token),
        Some(json!({ "receiver_id": bia.user.id, "content": "saudades" })),
    )
    .await;

    let (_, body) = app
        .send(Method::GET, "/notifications", Some(&bia.access_token), None)
        .await;
    assert_eq!(body[0]["kind"], "message");
    assert_eq!(body[0]["actor_id"], json!(ana.user.id));
}

#[tokio::test]
async fn invalid_messages_are_rejected() {
    let app = TestApp::new();
    let ana = app.member("ana@example.com", "Ana").await;

    let cases = [
        (json!({ "receiver_id": ana.user.id, "content": "eu mesma" }), StatusCode::BAD_REQUEST),
        (json!({ "receiver_id": uuid::Uuid::new_v4(), "content": "   " }), StatusCode::BAD_REQUEST),
        (
            json!({ "receiver_id": uuid::Uuid::new_v4(), "content": "x".repeat(4001) }),
            StatusCode::BAD_REQUEST,
        ),
        (json!({ "receiver_id": uuid::Uuid::new_v4(), "content": "olá?" }), StatusCode::NOT_FOUND),
    ];
    for (body, expected) in cases {
        let (status, _) = app
            .send(Method::POST, "/messages", Some(&ana.access_token), Some(body.clone()))
            .await;
        assert_eq!(status, expected, "{body}");
    }
}

#[tokio::test]
async fn inactive_profiles_are_not_contacts() {
    let app = TestApp::new();
    let ana = app.member("ana@example.com", "Ana").await;
    let bia = app.member("bia@example.com", "Bia").await;
    app.member("cris@example.com", "Cris").await;

    assert_eq!(contacts(&app, &ana.access_token).await.len(), 2);

    app.state
        .db
        .set_profile_active(&bia.user.id.to_string(), false)
        .unwrap();
    let names: Vec<_> = contacts(&app, &ana.access_token)
        .await
        .into_iter()
        .filter_map(|c| c.profile.full_name)
        .collect();
    assert_eq!(names, vec!["Cris"]);
}
