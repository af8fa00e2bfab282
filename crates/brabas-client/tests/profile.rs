mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use uuid::Uuid;

use brabas_client::profile::ProfileCache;
use brabas_client::storage::{LocalStore, MemoryStore, keys, load_json, save_json};
use brabas_types::models::{Profile, ProfilePatch};
use common::FakeBackend;

fn setup() -> (Arc<FakeBackend>, Arc<MemoryStore>, ProfileCache) {
    let backend = FakeBackend::new();
    let store = Arc::new(MemoryStore::new());
    let cache = ProfileCache::new(backend.clone(), store.clone());
    (backend, store, cache)
}

#[tokio::test(start_paused = true)]
async fn another_members_cache_is_never_used() {
    let (backend, store, cache) = setup();
    let user = backend.member("ana@x.com", "Ana Souza");
    let stranger = Profile::default_for(Uuid::new_v4(), "outra@x.com");
    save_json(store.as_ref(), keys::USER_PROFILE, &stranger);

    let profile = cache.load(&user).await;
    assert_eq!(profile.id, user.id);
    assert_eq!(profile.full_name.as_deref(), Some("Ana Souza"));
    assert_eq!(backend.count("get_profile"), 1);
    assert_eq!(cache.current(), Some(profile.clone()));

    let cached: Profile = load_json(store.as_ref(), keys::USER_PROFILE).unwrap();
    assert_eq!(cached.id, user.id);
}

#[tokio::test(start_paused = true)]
async fn missing_row_gets_a_default_profile() {
    let (backend, _store, cache) = setup();
    let user = backend.user("maria.silva+vip@x.com");

    let profile = cache.load(&user).await;
    assert_eq!(profile.username.as_deref(), Some("maria.silva"));
    assert!(profile.active);
    assert_eq!(backend.count("upsert_profile"), 1);
    assert!(backend.profiles.lock().unwrap().contains_key(&user.id));
}

#[tokio::test(start_paused = true)]
async fn partial_cache_without_id_is_adopted_and_pushed() {
    let (backend, store, cache) = setup();
    let user = backend.member("ana@x.com", "Ana Servidor");
    store.set(
        keys::USER_PROFILE,
        &json!({ "full_name": "Ana Local", "bio": "oi" }).to_string(),
    );

    let profile = cache.load(&user).await;
    assert_eq!(profile.id, user.id);
    assert_eq!(profile.full_name.as_deref(), Some("Ana Local"));
    assert_eq!(backend.count("get_profile"), 0);

    // Pushed to the backend without blocking the load.
    sleep(Duration::from_millis(1)).await;
    assert_eq!(backend.count("upsert_profile"), 1);
    let stored = backend.profiles.lock().unwrap()[&user.id].clone();
    assert_eq!(stored.full_name.as_deref(), Some("Ana Local"));
}

#[tokio::test(start_paused = true)]
async fn last_known_profile_wins_for_the_same_member() {
    let (backend, store, cache) = setup();
    let user = backend.member("ana@x.com", "Ana");
    let mut kept = Profile::default_for(user.id, "ana@x.com");
    kept.headline = Some("Mentora".into());
    save_json(store.as_ref(), keys::LAST_USER_PROFILE, &kept);

    let profile = cache.load(&user).await;
    assert_eq!(profile.headline.as_deref(), Some("Mentora"));
    assert_eq!(backend.count("get_profile"), 0);

    // A different member ignores it.
    let other = backend.member("bia@x.com", "Bia");
    let other_cache = ProfileCache::new(backend.clone(), store.clone());
    store.remove(keys::USER_PROFILE);
    let profile = other_cache.load(&other).await;
    assert_eq!(profile.id, other.id);
    assert_eq!(profile.headline, None);
}

#[tokio::test(start_paused = true)]
async fn unreachable_backend_falls_back_to_local_default() {
    let (backend, _store, cache) = setup();
    let user = backend.user("ana@x.com");
    backend.set_offline(true);

    let profile = cache.load(&user).await;
    assert_eq!(profile.id, user.id);
    assert_eq!(profile.username.as_deref(), Some("ana"));
}

#[tokio::test(start_paused = true)]
async fn update_falls_back_to_upsert_without_a_row() {
    let (backend, _store, cache) = setup();
    let user = backend.user("ana@x.com");
    backend.set_offline(true);
    cache.load(&user).await;
    backend.set_offline(false);

    let updated = cache
        .update_profile_json(&json!({ "bio": "Nova bio", "unknown_column": 1 }))
        .await
        .unwrap();
    assert_eq!(updated.bio.as_deref(), Some("Nova bio"));
    assert_eq!(backend.count("update_profile"), 1);
    assert_eq!(backend.count("upsert_profile"), 1);

    let again = cache
        .update_profile(&ProfilePatch {
            headline: Some("Empreendedora".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(again.bio.as_deref(), Some("Nova bio"));
    assert_eq!(again.headline.as_deref(), Some("Empreendedora"));
    assert_eq!(backend.count("upsert_profile"), 1);
}

#[tokio::test(start_paused = true)]
async fn sign_out_keeps_the_last_known_profile() {
    let (backend, store, cache) = setup();
    let user = backend.member("ana@x.com", "Ana");
    let profile = cache.load(&user).await;

    cache.on_sign_out();
    assert_eq!(cache.current(), None);
    assert_eq!(store.get(keys::USER_PROFILE), None);
    let kept: Profile = load_json(store.as_ref(), keys::LAST_USER_PROFILE).unwrap();
    assert_eq!(kept, profile);
}

#[tokio::test(start_paused = true)]
async fn updating_without_a_profile_needs_sign_in() {
    let (_backend, _store, cache) = setup();
    let err = cache.update_profile(&ProfilePatch::default()).await.unwrap_err();
    assert_eq!(err, brabas_client::ClientError::NotSignedIn);
}
