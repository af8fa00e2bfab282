use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// Location of the persisted local store.
    pub storage_path: PathBuf,
    /// Emergency admin override. Every use is logged.
    pub admin_override_emails: Vec<String>,
    /// Storage buckets tried, in order, for media uploads.
    pub media_buckets: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            storage_path: default_storage_path(),
            admin_override_emails: vec![],
            media_buckets: vec!["media".into(), "posts".into(), "avatars".into()],
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `BRABAS_URL`, `BRABAS_CLIENT_STORE` and
    /// `BRABAS_ADMIN_EMAILS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = var("BRABAS_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(path) = var("BRABAS_CLIENT_STORE") {
            config.storage_path = PathBuf::from(path);
        }
        if let Some(emails) = var("BRABAS_ADMIN_EMAILS") {
            config.admin_override_emails = emails
                .split(',')
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
        }
        config
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("brabas")
        .join("store.json")
}
