pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod messaging;
pub mod offline;
pub mod pending;
pub mod posts;
pub mod profile;
pub mod session;
pub mod storage;
pub mod upload;

use std::sync::Arc;

use uuid::Uuid;

pub use crate::backend::Backend;
pub use crate::config::ClientConfig;
pub use crate::error::{BackendError, ClientError};

use crate::admin::{AccessPolicy, AdminPolicy};
use crate::http::HttpBackend;
use crate::messaging::MessagingSync;
use crate::offline::{FlushReport, OfflineQueue};
use crate::posts::PostService;
use crate::profile::ProfileCache;
use crate::session::SessionManager;
use crate::storage::{JsonFileStore, LocalStore};
use crate::upload::MediaUploader;

/// The client services wired to one backend and one local store. Built once
/// at startup and shared by reference.
pub struct BrabasClient {
    backend: Arc<dyn Backend>,
    pub session: SessionManager,
    pub profiles: Arc<ProfileCache>,
    pub offline: Arc<OfflineQueue>,
    pub uploader: Arc<MediaUploader>,
    pub admin: Arc<AccessPolicy>,
    pub posts: PostService,
}

impl BrabasClient {
    /// HTTP backend at `config.base_url`, state persisted at
    /// `config.storage_path`.
    pub fn connect(config: &ClientConfig) -> Self {
        let store: Arc<dyn LocalStore> = Arc::new(JsonFileStore::open(&config.storage_path));
        let backend = Arc::new(HttpBackend::new(config.base_url.clone(), Arc::clone(&store)));
        Self::with_backend(config, backend, store)
    }

    pub fn with_backend<B>(config: &ClientConfig, backend: Arc<B>, store: Arc<dyn LocalStore>) -> Self
    where
        B: Backend + 'static,
    {
        let offline = Arc::new(OfflineQueue::new(Arc::clone(&store)));
        let uploader = Arc::new(MediaUploader::new(
            backend.clone(),
            config.media_buckets.clone(),
        ));
        let admin = Arc::new(AccessPolicy::new(
            backend.clone(),
            Arc::clone(&store),
            config.admin_override_emails.clone(),
        ));
        let policy: Arc<dyn AdminPolicy> = admin.clone();
        Self {
            session: SessionManager::new(backend.clone()),
            profiles: Arc::new(ProfileCache::new(backend.clone(), Arc::clone(&store))),
            posts: PostService::new(
                backend.clone(),
                Arc::clone(&uploader),
                policy,
                Arc::clone(&offline),
            ),
            offline,
            uploader,
            admin,
            backend,
        }
    }

    /// Messaging for the signed-in member `me`.
    pub fn messaging(&self, me: Uuid) -> MessagingSync {
        MessagingSync::new(Arc::clone(&self.backend), Arc::clone(&self.offline), me)
    }

    /// Replay actions queued while offline.
    pub async fn flush_offline(&self) -> FlushReport {
        self.offline.flush(self.backend.as_ref()).await
    }

    /// Sign out and keep the profile as the last known good one.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        self.profiles.on_sign_out();
        self.session.sign_out().await
    }
}
