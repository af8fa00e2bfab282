#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use brabas_api::{ApiConfig, AppState, AppStateInner};
use brabas_db::Database;
use brabas_gateway::dispatcher::Dispatcher;
use brabas_types::api::Session;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _storage: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let storage = tempfile::tempdir().expect("tempdir");
        let config = ApiConfig {
            jwt_secret: "test-secret".into(),
            storage_dir: storage.path().to_path_buf(),
            public_url: "http://brabas.test".into(),
            ..ApiConfig::default()
        };
        let db = Database::open_in_memory().expect("in-memory db");
        let state = AppStateInner::new(db, config, Dispatcher::new());
        Self {
            app: brabas_api::router(state.clone()),
            state,
            _storage: storage,
        }
    }

    pub fn storage_dir(&self) -> &std::path::Path {
        self._storage.path()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .expect("request");
        self.dispatch(req).await
    }

    pub async fn dispatch(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.expect("router");
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Session {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth/signup",
                None,
                Some(json!({ "email": email, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        serde_json::from_value(body).expect("session")
    }

    /// A signed-up member with a stored profile, the way the client creates
    /// it on first login.
    pub async fn member(&self, email: &str, full_name: &str) -> Session {
        let session = self.sign_up(email, "senha-forte").await;
        let id = session.user.id;
        let username = email.split('@').next().unwrap_or_default();
        let (status, body) = self
            .send(
                Method::PUT,
                &format!("/profiles/{id}"),
                Some(&session.access_token),
                Some(json!({
                    "id": id,
                    "full_name": full_name,
                    "username": username,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        session
    }

    pub fn make_admin(&self, id: Uuid) {
        assert!(self.state.db.set_admin_flag(&id.to_string(), true).expect("db"));
    }
}
