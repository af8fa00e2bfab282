use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use brabas_types::api::{
    CreatePostRequest, ErrorBody, LikeResponse, MarkReadResponse, PostQuery, Session,
    UploadResponse,
};
use brabas_types::events::{ChangeFilter, RealtimeCommand, RealtimeEvent};
use brabas_types::models::{Comment, Contact, Message, PollData, Post, Profile, ProfilePatch};

use crate::backend::{
    AuthBackend, AuthEvent, RealtimeBackend, StorageBackend, Subscription, TableBackend,
};
use crate::error::BackendError;
use crate::storage::{LocalStore, keys, load_json, save_json};

/// Backend adapter over the REST API and the `/realtime` WebSocket.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    store: Arc<dyn LocalStore>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpBackend {
    /// Restores a session persisted by a previous run, if any.
    pub fn new(base_url: impl Into<String>, store: Arc<dyn LocalStore>) -> Self {
        let session = load_json::<Session>(store.as_ref(), keys::AUTH_SESSION);
        let (events, _) = broadcast::channel(64);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            session: RwLock::new(session),
            events,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn set_session(&self, session: Option<Session>) {
        match &session {
            Some(s) => save_json(self.store.as_ref(), keys::AUTH_SESSION, s),
            None => self.store.remove(keys::AUTH_SESSION),
        }
        if let Ok(mut slot) = self.session.write() {
            *slot = session;
        }
    }

    fn emit(&self, event: AuthEvent) {
        // no listeners is fine
        let _ = self.events.send(event);
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        let token = self
            .current()
            .map(|s| s.access_token)
            .ok_or(BackendError::NotAuthenticated)?;
        Ok(self.client.request(method, self.url(path)).bearer_auth(token))
    }

    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        let resp = check(req.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        self.call(self.authed(Method::GET, path)?).await
    }

    async fn send<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        self.call(self.authed(method, path)?.json(body)).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        self.call(self.authed(Method::POST, path)?).await
    }

    async fn open_session(&self, path: &str, body: serde_json::Value) -> Result<Session, BackendError> {
        let req = self.client.post(self.url(path)).json(&body);
        let session: Session = self.call(req).await?;
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/realtime", base)
    }
}

/// Turn a non-success response into a typed error.
async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = status.as_u16();
    Err(match resp.json::<ErrorBody>().await {
        Ok(body) => BackendError::Api {
            status: code,
            code: body.error,
            message: body.message,
        },
        Err(_) => BackendError::Api {
            status: code,
            code: format!("http_{}", code),
            message: status.canonical_reason().unwrap_or("error").to_string(),
        },
    })
}

fn optional<T>(result: Result<T, BackendError>) -> Result<Option<T>, BackendError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        match self.current() {
            Some(session) if session.is_expired() => self.refresh_session().await,
            other => Ok(other),
        }
    }

    async fn refresh_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(refresh_token) = self.current().map(|s| s.refresh_token) else {
            return Ok(None);
        };
        let req = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&json!({ "refresh_token": refresh_token }));

        match self.call::<Session>(req).await {
            Ok(session) => {
                self.set_session(Some(session.clone()));
                self.emit(AuthEvent::TokenRefreshed(session.clone()));
                Ok(Some(session))
            }
            Err(e @ BackendError::Api { status: 401, .. })
            | Err(e @ BackendError::Api { status: 403, .. }) => {
                info!("Refresh token rejected, signing out");
                self.set_session(None);
                self.emit(AuthEvent::SignedOut);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = self
            .open_session("/auth/token", json!({ "email": email, "password": password }))
            .await?;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<Session, BackendError> {
        let session = self
            .open_session(
                "/auth/signup",
                json!({ "email": email, "password": password, "full_name": full_name }),
            )
            .await?;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if let Ok(req) = self.authed(Method::POST, "/auth/logout") {
            // The local session goes away even if the server is unreachable.
            if let Err(e) = req.send().await.map_err(BackendError::from) {
                warn!("Logout request failed: {}", e);
            }
        }
        self.set_session(None);
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl TableBackend for HttpBackend {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, BackendError> {
        optional(self.get(&format!("/profiles/{}", id)).await)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<Profile>, BackendError> {
        optional(self.send(Method::PATCH, &format!("/profiles/{}", id), patch).await)
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, BackendError> {
        self.send(Method::PUT, &format!("/profiles/{}", profile.id), profile)
            .await
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, BackendError> {
        self.get("/contacts").await
    }

    async fn get_conversation(&self, other: Uuid) -> Result<Vec<Message>, BackendError> {
        self.get(&format!("/messages/{}", other)).await
    }

    async fn send_message(&self, receiver: Uuid, content: &str) -> Result<Message, BackendError> {
        self.send(
            Method::POST,
            "/messages",
            &json!({ "receiver_id": receiver, "content": content }),
        )
        .await
    }

    async fn mark_read(&self, other: Uuid) -> Result<u64, BackendError> {
        let resp: MarkReadResponse = self.post_empty(&format!("/messages/{}/read", other)).await?;
        Ok(resp.updated)
    }

    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, BackendError> {
        self.call(self.authed(Method::GET, "/posts")?.query(query)).await
    }

    async fn create_post(&self, req: &CreatePostRequest) -> Result<Post, BackendError> {
        self.send(Method::POST, "/posts", req).await
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), BackendError> {
        let req = self.authed(Method::DELETE, &format!("/posts/{}", id))?;
        check(req.send().await?).await?;
        Ok(())
    }

    async fn soft_delete_post(&self, id: Uuid) -> Result<Post, BackendError> {
        self.post_empty(&format!("/posts/{}/soft-delete", id)).await
    }

    async fn toggle_pin(&self, id: Uuid) -> Result<Post, BackendError> {
        self.post_empty(&format!("/posts/{}/pin", id)).await
    }

    async fn toggle_like(&self, id: Uuid) -> Result<LikeResponse, BackendError> {
        self.post_empty(&format!("/posts/{}/like", id)).await
    }

    async fn list_comments(&self, post: Uuid) -> Result<Vec<Comment>, BackendError> {
        self.get(&format!("/posts/{}/comments", post)).await
    }

    async fn create_comment(&self, post: Uuid, content: &str) -> Result<Comment, BackendError> {
        self.send(
            Method::POST,
            &format!("/posts/{}/comments", post),
            &json!({ "content": content }),
        )
        .await
    }

    async fn vote(&self, post: Uuid, option: usize) -> Result<PollData, BackendError> {
        self.send(
            Method::POST,
            &format!("/posts/{}/poll/vote", post),
            &json!({ "option": option }),
        )
        .await
    }

    async fn admin_status(&self) -> Result<bool, BackendError> {
        let status: serde_json::Value = self.get("/admin/me").await?;
        Ok(status["is_admin"].as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl RealtimeBackend for HttpBackend {
    async fn subscribe(
        &self,
        topic: &str,
        filter: ChangeFilter,
    ) -> Result<Subscription, BackendError> {
        let token = self
            .current()
            .map(|s| s.access_token)
            .ok_or(BackendError::NotAuthenticated)?;

        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url())
            .await
            .map_err(|e| BackendError::Network(format!("realtime connect failed: {}", e)))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let encode = |cmd: RealtimeCommand| -> Result<WsMessage, BackendError> {
            serde_json::to_string(&cmd)
                .map(|text| WsMessage::Text(text.into()))
                .map_err(|e| BackendError::Decode(e.to_string()))
        };

        ws_tx
            .send(encode(RealtimeCommand::Identify { token })?)
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        ws_tx
            .send(encode(RealtimeCommand::Subscribe {
                topic: topic.to_string(),
                filter,
            })?)
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        // Wait for the handshake and the subscription acknowledgement.
        loop {
            let event = match ws_rx.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    serde_json::from_str::<RealtimeEvent>(text.as_str()).ok()
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(BackendError::Network(e.to_string())),
                None => {
                    return Err(BackendError::Network("realtime connection closed".into()));
                }
            };
            match event {
                Some(RealtimeEvent::Subscribed { topic: t }) if t == topic => break,
                Some(RealtimeEvent::Rejected { topic: t, reason }) if t == topic => {
                    return Err(BackendError::Api {
                        status: 403,
                        code: "forbidden".into(),
                        message: reason,
                    });
                }
                _ => continue,
            }
        }
        debug!("Subscribed to {}", topic);

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let name = topic.to_string();
        let pump = tokio::spawn(async move {
            // the write half stays alive for as long as the subscription
            let _ws_tx = ws_tx;
            while let Some(frame) = ws_rx.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                if let Ok(RealtimeEvent::Change { change, .. }) =
                    serde_json::from_str::<RealtimeEvent>(text.as_str())
                {
                    if changes_tx.send(change).is_err() {
                        break;
                    }
                }
            }
            debug!("Realtime feed for {} ended", name);
        });

        Ok(Subscription::new(topic, changes_rx, Some(pump)))
    }
}

#[async_trait]
impl StorageBackend for HttpBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let req = self
            .authed(Method::PUT, &format!("/storage/{}/{}", bucket, path))?
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        let resp: UploadResponse = self.call(req).await?;
        Ok(resp.public_url)
    }
}
