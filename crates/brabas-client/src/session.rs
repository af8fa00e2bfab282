//! Session/auth manager: wraps the backend's session lookup, auth events
//! and refresh with de-duplication, bounded recovery and a loading safety
//! net. All throttling state belongs to the manager instance.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use brabas_types::api::{AuthUser, Session};

use crate::backend::{AuthBackend, AuthEvent};
use crate::error::{BackendError, ClientError, backend_message};

/// Repeated session checks or refreshes inside this window reuse the
/// previous answer.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(2);
/// Delay of the extra refresh that follows a sign-in.
pub const SIGNED_IN_SETTLE: Duration = Duration::from_millis(500);
pub const RECOVERY_SPACING: Duration = Duration::from_secs(3);
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;
/// `loading` never stays set longer than this after `initialize`.
pub const LOADING_SAFETY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session: Option<Session>,
    pub loading: bool,
    pub initialized: bool,
    /// Localized description of the last auth failure.
    pub auth_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session: None,
            loading: true,
            initialized: false,
            auth_error: None,
        }
    }
}

#[derive(Default)]
struct Throttle {
    last_check: Option<Instant>,
    last_refresh: Option<Instant>,
}

#[derive(Default)]
struct Recovery {
    attempts: u32,
    last_attempt: Option<Instant>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    state: watch::Sender<SessionState>,
    /// Held across the backend call so concurrent callers share one result.
    throttle: AsyncMutex<Throttle>,
    recovery: AsyncMutex<Recovery>,
    listener: Mutex<Option<JoinHandle<()>>>,
    settle: Mutex<Option<JoinHandle<()>>>,
    safety: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in [&self.listener, &self.settle, &self.safety] {
            if let Ok(mut slot) = slot.lock() {
                if let Some(task) = slot.take() {
                    task.abort();
                }
            }
        }
    }
}

/// Install `task` in `slot`, aborting whatever ran there before.
fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, task: JoinHandle<()>) {
    if let Ok(mut slot) = slot.lock() {
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }
}

impl SessionManager {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                state,
                throttle: AsyncMutex::new(Throttle::default()),
                recovery: AsyncMutex::new(Recovery::default()),
                listener: Mutex::new(None),
                settle: Mutex::new(None),
                safety: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.state.borrow().session.as_ref().map(|s| s.user.clone())
    }

    /// Start listening for auth events, arm the loading safety net and
    /// fetch the initial session.
    pub async fn initialize(&self) -> Option<Session> {
        self.listen();
        self.arm_safety_timer();
        self.get_initial_session().await
    }

    fn arm_safety_timer(&self) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            sleep(LOADING_SAFETY_TIMEOUT).await;
            if let Some(inner) = weak.upgrade() {
                inner.state.send_if_modified(|s| {
                    if !s.loading {
                        return false;
                    }
                    warn!("Session still loading after {:?}, releasing", LOADING_SAFETY_TIMEOUT);
                    s.loading = false;
                    true
                });
            }
        });
        replace_task(&self.inner.safety, task);
    }

    /// Fetch the current session. Calls within [`DEDUP_WINDOW`] of the
    /// previous one return the cached session without touching the backend.
    pub async fn get_initial_session(&self) -> Option<Session> {
        let mut throttle = self.inner.throttle.lock().await;
        if throttle
            .last_check
            .is_some_and(|at| at.elapsed() < DEDUP_WINDOW)
        {
            debug!("Session check suppressed, reusing cached session");
            return self.session();
        }
        throttle.last_check = Some(Instant::now());

        let result = self.inner.backend.get_session().await;
        self.inner.state.send_modify(|s| {
            match &result {
                Ok(session) => {
                    s.session = session.clone();
                    s.auth_error = None;
                }
                Err(e) => {
                    warn!("Session check failed: {}", e);
                    s.auth_error = Some(backend_message(e));
                }
            }
            s.loading = false;
            if !s.initialized {
                s.initialized = true;
            }
        });
        self.session()
    }

    /// Refresh the session, sharing the same de-duplication window.
    /// `loading` is cleared on every path.
    pub async fn refresh_session(&self) -> Option<Session> {
        let mut throttle = self.inner.throttle.lock().await;
        if throttle
            .last_refresh
            .is_some_and(|at| at.elapsed() < DEDUP_WINDOW)
        {
            debug!("Session refresh suppressed, reusing cached session");
            self.inner.state.send_if_modified(|s| std::mem::take(&mut s.loading));
            return self.session();
        }
        throttle.last_refresh = Some(Instant::now());

        let result = self.inner.backend.refresh_session().await;
        self.inner.state.send_modify(|s| {
            match &result {
                Ok(session) => {
                    s.session = session.clone();
                    s.auth_error = None;
                }
                Err(e) => {
                    warn!("Session refresh failed: {}", e);
                    s.auth_error = Some(backend_message(e));
                }
            }
            s.loading = false;
        });
        self.session()
    }

    /// One bounded attempt at getting a usable session back. Returns `false`
    /// without calling the backend once [`MAX_RECOVERY_ATTEMPTS`] were made or
    /// when the previous attempt is less than [`RECOVERY_SPACING`] old.
    pub async fn attempt_session_recovery(&self) -> bool {
        let mut recovery = self.inner.recovery.lock().await;
        if recovery.attempts >= MAX_RECOVERY_ATTEMPTS {
            debug!("Session recovery exhausted");
            return false;
        }
        if recovery
            .last_attempt
            .is_some_and(|at| at.elapsed() < RECOVERY_SPACING)
        {
            debug!("Session recovery throttled");
            return false;
        }
        recovery.attempts += 1;
        recovery.last_attempt = Some(Instant::now());
        info!(
            "Session recovery attempt {}/{}",
            recovery.attempts, MAX_RECOVERY_ATTEMPTS
        );

        match self.inner.backend.refresh_session().await {
            Ok(Some(session)) => {
                self.inner.state.send_modify(|s| {
                    s.session = Some(session);
                    s.auth_error = None;
                    s.loading = false;
                });
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Session recovery failed: {}", e);
                self.inner
                    .state
                    .send_modify(|s| s.auth_error = Some(backend_message(&e)));
                false
            }
        }
    }

    /// Install the auth event listener. Only one is ever active; a previous
    /// one is stopped first.
    pub fn listen(&self) {
        let mut events = self.inner.backend.auth_events();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {} auth events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(manager) = SessionManager::from_weak(&weak) else {
                    break;
                };
                manager.on_auth_event(event);
            }
        });
        replace_task(&self.inner.listener, task);
    }

    fn on_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                info!("Signed in as {}", session.user.email);
                self.inner.state.send_modify(|s| {
                    s.session = Some(session);
                    s.auth_error = None;
                    s.loading = false;
                });
                self.schedule_settle_refresh();
            }
            AuthEvent::TokenRefreshed(session) => {
                debug!("Token refreshed");
                self.inner.state.send_modify(|s| s.session = Some(session));
            }
            AuthEvent::UserUpdated(user) => {
                self.inner.state.send_if_modified(|s| match s.session.as_mut() {
                    Some(session) => {
                        session.user = user;
                        true
                    }
                    None => false,
                });
            }
            AuthEvent::SignedOut => {
                info!("Signed out");
                self.inner.state.send_modify(|s| {
                    s.session = None;
                    s.loading = false;
                });
            }
        }
    }

    /// The backend may take a moment to see a brand new session everywhere;
    /// refresh once after it settles.
    fn schedule_settle_refresh(&self) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            sleep(SIGNED_IN_SETTLE).await;
            if let Some(manager) = SessionManager::from_weak(&weak) {
                manager.refresh_session().await;
            }
        });
        replace_task(&self.inner.settle, task);
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        self.begin_auth();
        let result = self.inner.backend.sign_in(email.trim(), password).await;
        self.finish_auth(result)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<Session, ClientError> {
        self.begin_auth();
        let result = self
            .inner
            .backend
            .sign_up(email.trim(), password, full_name)
            .await;
        self.finish_auth(result)
    }

    pub async fn sign_out(&self) -> Result<(), ClientError> {
        if let Ok(mut settle) = self.inner.settle.lock() {
            if let Some(task) = settle.take() {
                task.abort();
            }
        }
        let result = self.inner.backend.sign_out().await;
        self.inner.state.send_modify(|s| {
            s.session = None;
            s.loading = false;
            s.auth_error = result.as_ref().err().map(backend_message);
        });
        result.map_err(ClientError::from)
    }

    fn begin_auth(&self) {
        self.inner.state.send_modify(|s| {
            s.loading = true;
            s.auth_error = None;
        });
    }

    fn finish_auth(&self, result: Result<Session, BackendError>) -> Result<Session, ClientError> {
        match result {
            Ok(session) => {
                self.inner.state.send_modify(|s| {
                    s.session = Some(session.clone());
                    s.loading = false;
                });
                Ok(session)
            }
            Err(e) => {
                warn!("Authentication failed: {}", e);
                self.inner.state.send_modify(|s| {
                    s.auth_error = Some(backend_message(&e));
                    s.loading = false;
                });
                Err(e.into())
            }
        }
    }
}
