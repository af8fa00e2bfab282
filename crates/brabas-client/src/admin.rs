//! Admin checks and the admin panel's connectivity retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use brabas_types::api::AuthUser;

use crate::backend::TableBackend;
use crate::error::{BackendError, ClientError};
use crate::storage::{LocalStore, keys, load_json, save_json};

/// Delay between automatic retries when the backend is unreachable.
pub const RETRY_DELAY: Duration = Duration::from_secs(15);
pub const MAX_AUTO_RETRIES: u32 = 3;

#[async_trait]
pub trait AdminPolicy: Send + Sync {
    async fn is_admin(&self, user: &AuthUser) -> bool;
}

/// Last answer from the backend, reused only while it is unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedRoles {
    user_id: Uuid,
    is_admin: bool,
}

/// The backend is the source of truth. An explicit override list grants
/// emergency access and every use of it is logged.
pub struct AccessPolicy {
    backend: Arc<dyn TableBackend>,
    store: Arc<dyn LocalStore>,
    overrides: Vec<String>,
}

impl AccessPolicy {
    pub fn new(
        backend: Arc<dyn TableBackend>,
        store: Arc<dyn LocalStore>,
        overrides: Vec<String>,
    ) -> Self {
        Self {
            backend,
            store,
            overrides: overrides.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl AdminPolicy for AccessPolicy {
    /// `user` must be the signed-in member: the backend answers for the
    /// session it sees.
    async fn is_admin(&self, user: &AuthUser) -> bool {
        if self.overrides.contains(&user.email.to_lowercase()) {
            warn!("Emergency admin override used for {}", user.email);
            return true;
        }

        match self.backend.admin_status().await {
            Ok(is_admin) => {
                save_json(
                    self.store.as_ref(),
                    keys::USER_ROLES,
                    &CachedRoles {
                        user_id: user.id,
                        is_admin,
                    },
                );
                is_admin
            }
            Err(e) if e.is_network() => {
                let cached = load_json::<CachedRoles>(self.store.as_ref(), keys::USER_ROLES)
                    .filter(|c| c.user_id == user.id)
                    .is_some_and(|c| c.is_admin);
                debug!("Backend unreachable, cached admin answer: {}", cached);
                cached
            }
            Err(e) => {
                warn!("Admin check failed: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    Connected,
    Retrying { attempt: u32 },
    /// Automatic retries are exhausted; only [`ConnectivityGuard::reload`]
    /// starts over.
    Unreachable,
}

/// Runs admin panel loads, retrying connectivity failures a bounded number
/// of times before giving up.
pub struct ConnectivityGuard {
    status: watch::Sender<GuardStatus>,
}

impl Default for ConnectivityGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityGuard {
    pub fn new() -> Self {
        let (status, _) = watch::channel(GuardStatus::Connected);
        Self { status }
    }

    pub fn status(&self) -> GuardStatus {
        *self.status.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<GuardStatus> {
        self.status.subscribe()
    }

    /// Manual reload: clear the unreachable state.
    pub fn reload(&self) {
        info!("Manual reload requested");
        self.status.send_replace(GuardStatus::Connected);
    }

    /// Run `op`, retrying network failures up to [`MAX_AUTO_RETRIES`] times
    /// spaced by [`RETRY_DELAY`]. Other failures return immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        if self.status() == GuardStatus::Unreachable {
            return Err(ClientError::Unreachable);
        }

        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.status.send_replace(GuardStatus::Connected);
                    return Ok(value);
                }
                Err(e) if e.is_network() => {
                    if attempt >= MAX_AUTO_RETRIES {
                        warn!("Backend unreachable after {} retries", attempt);
                        self.status.send_replace(GuardStatus::Unreachable);
                        return Err(ClientError::Unreachable);
                    }
                    attempt += 1;
                    info!("Backend unreachable, retry {}/{} in {:?}", attempt, MAX_AUTO_RETRIES, RETRY_DELAY);
                    self.status.send_replace(GuardStatus::Retrying { attempt });
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    self.status.send_replace(GuardStatus::Connected);
                    return Err(e.into());
                }
            }
        }
    }
}
