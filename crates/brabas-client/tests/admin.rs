mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use brabas_client::ClientError;
use brabas_client::admin::{
    AccessPolicy, AdminPolicy, ConnectivityGuard, GuardStatus, MAX_AUTO_RETRIES, RETRY_DELAY,
};
use brabas_client::error::BackendError;
use brabas_client::storage::{LocalStore, MemoryStore, keys};
use common::FakeBackend;

fn policy(backend: &Arc<FakeBackend>, overrides: &[&str]) -> (AccessPolicy, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let policy = AccessPolicy::new(
        backend.clone(),
        store.clone(),
        overrides.iter().map(|e| e.to_string()).collect(),
    );
    (policy, store)
}

#[tokio::test(start_paused = true)]
async fn backend_answer_is_authoritative_and_cached() {
    let backend = FakeBackend::new();
    let ana = backend.member("ana@x.com", "Ana");
    backend.sign_in_as(&ana);
    let (policy, store) = policy(&backend, &[]);

    assert!(!policy.is_admin(&ana).await);
    backend.set_admin(true);
    assert!(policy.is_admin(&ana).await);
    assert!(store.get(keys::USER_ROLES).is_some());

    // Unreachable backend: the last answer for this member stands.
    backend.set_offline(true);
    assert!(policy.is_admin(&ana).await);
    let bia = backend.user("bia@x.com");
    assert!(!policy.is_admin(&bia).await);
}

#[tokio::test(start_paused = true)]
async fn override_list_skips_the_backend() {
    let backend = FakeBackend::new();
    let ops = backend.member("Ops@X.com", "Ops");
    let (policy, _store) = policy(&backend, &["ops@x.com"]);

    assert!(policy.is_admin(&ops).await);
    assert_eq!(backend.count("admin_status"), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_checks_are_not_admin() {
    let backend = FakeBackend::new();
    let ana = backend.user("ana@x.com");
    // No session: the backend refuses to answer.
    let (policy, _store) = policy(&backend, &[]);
    assert!(!policy.is_admin(&ana).await);
}

#[tokio::test(start_paused = true)]
async fn guard_gives_up_after_bounded_retries() {
    let guard = ConnectivityGuard::new();
    let calls = AtomicUsize::new(0);
    let counter = &calls;
    let started = Instant::now();

    let result: Result<(), ClientError> = guard
        .run(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Network("down".into()))
        })
        .await;

    assert_eq!(result, Err(ClientError::Unreachable));
    assert_eq!(calls.load(Ordering::SeqCst), MAX_AUTO_RETRIES as usize + 1);
    assert_eq!(started.elapsed(), RETRY_DELAY * MAX_AUTO_RETRIES);
    assert_eq!(guard.status(), GuardStatus::Unreachable);

    // Only a manual reload starts over.
    let again: Result<(), ClientError> = guard.run(|| async { Ok(()) }).await;
    assert_eq!(again, Err(ClientError::Unreachable));
    guard.reload();
    assert_eq!(guard.run(|| async { Ok(7) }).await, Ok(7));
    assert_eq!(guard.status(), GuardStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn guard_recovers_when_the_backend_returns() {
    let guard = ConnectivityGuard::new();
    let mut status = guard.watch();
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    let result = guard
        .run(move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BackendError::Network("down".into()))
            } else {
                Ok("painel")
            }
        })
        .await;
    assert_eq!(result, Ok("painel"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), GuardStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn other_failures_are_not_retried() {
    let guard = ConnectivityGuard::new();
    let started = Instant::now();
    let result: Result<(), ClientError> = guard
        .run(|| async {
            Err(BackendError::Api {
                status: 403,
                code: "forbidden".into(),
                message: "Admin access required".into(),
            })
        })
        .await;
    assert!(matches!(result, Err(ClientError::Backend(_))));
    assert_eq!(started.elapsed(), Duration::ZERO);
}
