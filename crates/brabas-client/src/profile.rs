//! The signed-in member's profile, resolved from local caches first and the
//! backend second.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use brabas_types::api::AuthUser;
use brabas_types::models::{Profile, ProfilePatch};

use crate::backend::TableBackend;
use crate::error::ClientError;
use crate::storage::{LocalStore, keys, load_json, save_json};

pub struct ProfileCache {
    backend: Arc<dyn TableBackend>,
    store: Arc<dyn LocalStore>,
    current: Mutex<Option<Profile>>,
}

impl ProfileCache {
    pub fn new(backend: Arc<dyn TableBackend>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            backend,
            store,
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<Profile> {
        self.current.lock().ok()?.clone()
    }

    /// Resolve the profile of `user`. Never fails: when the backend is
    /// unreachable a local default stands in.
    ///
    /// Order: the profile kept from the last sign-out (matching id only),
    /// the general cache (no id or matching id), the backend row, and
    /// finally a freshly created default.
    pub async fn load(&self, user: &AuthUser) -> Profile {
        if let Some(profile) = self.last_known(user) {
            debug!("Using profile kept from last sign-out");
            return self.adopt(profile);
        }
        if let Some(profile) = self.cached(user) {
            debug!("Using cached profile");
            return self.adopt(profile);
        }

        match self.backend.get_profile(user.id).await {
            Ok(Some(profile)) => {
                self.remember(&profile);
                profile
            }
            Ok(None) => {
                info!("No profile for {}, creating default", user.email);
                let profile = default_profile(user);
                match self.backend.upsert_profile(&profile).await {
                    Ok(created) => {
                        self.remember(&created);
                        created
                    }
                    Err(e) => {
                        warn!("Failed to create profile: {}", e);
                        self.remember(&profile);
                        profile
                    }
                }
            }
            Err(e) => {
                warn!("Failed to fetch profile, using local default: {}", e);
                let profile = default_profile(user);
                self.remember(&profile);
                profile
            }
        }
    }

    fn last_known(&self, user: &AuthUser) -> Option<Profile> {
        load_json::<Profile>(self.store.as_ref(), keys::LAST_USER_PROFILE)
            .filter(|p| p.id == user.id)
    }

    /// The general cache may hold a partial object without an id (written
    /// before the member had a row). A different member's cache is skipped
    /// but left in place.
    fn cached(&self, user: &AuthUser) -> Option<Profile> {
        let raw = load_json::<Value>(self.store.as_ref(), keys::USER_PROFILE)?;
        if !raw.is_object() {
            return None;
        }
        match raw.get("id").and_then(Value::as_str) {
            Some(id) if id != user.id.to_string() => {
                debug!("Cached profile belongs to another member, ignoring");
                return None;
            }
            Some(_) => {
                if let Ok(profile) = serde_json::from_value::<Profile>(raw.clone()) {
                    return Some(profile);
                }
            }
            None => {}
        }
        let mut profile = default_profile(user);
        profile.apply(&ProfilePatch::from_json(&raw));
        Some(profile)
    }

    /// Make `profile` current and push it to the backend without waiting.
    fn adopt(&self, profile: Profile) -> Profile {
        self.remember(&profile);
        let backend = Arc::clone(&self.backend);
        let pushed = profile.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.upsert_profile(&pushed).await {
                warn!("Failed to sync cached profile: {}", e);
            }
        });
        profile
    }

    fn remember(&self, profile: &Profile) {
        save_json(self.store.as_ref(), keys::USER_PROFILE, profile);
        if let Ok(mut current) = self.current.lock() {
            *current = Some(profile.clone());
        }
    }

    /// Write the fields present in `patch`. Falls back to an upsert of the
    /// patched profile when the backend has no row to update.
    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<Profile, ClientError> {
        let mut profile = self.current().ok_or(ClientError::NotSignedIn)?;
        if patch.is_empty() {
            return Ok(profile);
        }

        let updated = match self.backend.update_profile(profile.id, patch).await? {
            Some(updated) => updated,
            None => {
                debug!("No profile row to update, upserting");
                profile.apply(patch);
                self.backend.upsert_profile(&profile).await?
            }
        };
        self.remember(&updated);
        Ok(updated)
    }

    /// Like [`update_profile`](Self::update_profile), from a raw form object.
    /// Unknown keys are dropped.
    pub async fn update_profile_json(&self, form: &Value) -> Result<Profile, ClientError> {
        self.update_profile(&ProfilePatch::from_json(form)).await
    }

    /// Keep the current profile as the last known good one and clear the
    /// general cache.
    pub fn on_sign_out(&self) {
        let previous = self.current.lock().ok().and_then(|mut c| c.take());
        if let Some(profile) = previous {
            save_json(self.store.as_ref(), keys::LAST_USER_PROFILE, &profile);
        }
        self.store.remove(keys::USER_PROFILE);
    }
}

fn default_profile(user: &AuthUser) -> Profile {
    let mut profile = Profile::default_for(user.id, &user.email);
    profile.full_name = user.full_name.clone();
    profile
}
