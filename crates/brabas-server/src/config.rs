use std::path::PathBuf;

use anyhow::Context;
use brabas_api::ApiConfig;

/// JWT secrets that are fine for local development only.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub api: ApiConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = ApiConfig::default();

        let host = var("BRABAS_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("BRABAS_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("BRABAS_PORT must be a port number")?;
        let db_path = var("BRABAS_DB_PATH").unwrap_or_else(|| "brabas.db".into()).into();

        let jwt_secret = var("BRABAS_JWT_SECRET").unwrap_or(defaults.jwt_secret);
        let access_secs: i64 = var("BRABAS_ACCESS_TOKEN_TTL_SECS")
            .map(|v| v.parse())
            .transpose()
            .context("BRABAS_ACCESS_TOKEN_TTL_SECS must be an integer")?
            .unwrap_or(3600);
        let refresh_days: i64 = var("BRABAS_REFRESH_TOKEN_TTL_DAYS")
            .map(|v| v.parse())
            .transpose()
            .context("BRABAS_REFRESH_TOKEN_TTL_DAYS must be an integer")?
            .unwrap_or(30);

        let storage_dir = var("BRABAS_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir);
        let storage_buckets = var("BRABAS_STORAGE_BUCKETS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.storage_buckets);
        let admin_emails = var("BRABAS_ADMIN_EMAILS")
            .map(|v| split_list(&v.to_lowercase()))
            .unwrap_or_default();
        let public_url = var("BRABAS_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{}", port));

        Ok(Self {
            host,
            port,
            db_path,
            api: ApiConfig {
                jwt_secret,
                access_token_ttl: chrono::Duration::seconds(access_secs),
                refresh_token_ttl: chrono::Duration::days(refresh_days),
                admin_emails,
                storage_dir,
                storage_buckets,
                public_url,
            },
        })
    }

    pub fn uses_placeholder_secret(&self) -> bool {
        PLACEHOLDER_SECRETS.contains(&self.api.jwt_secret.as_str())
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
