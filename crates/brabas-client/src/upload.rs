use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use brabas_types::models::{MediaItem, MediaKind};

use crate::backend::StorageBackend;

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Uploads post media to object storage. Buckets are tried in order,
/// starting with the last one that worked; when none accepts the file it
/// is embedded as a `data:` URL so the post can still be published.
pub struct MediaUploader {
    backend: Arc<dyn StorageBackend>,
    buckets: Vec<String>,
    discovered: Mutex<Option<String>>,
}

impl MediaUploader {
    pub fn new(backend: Arc<dyn StorageBackend>, buckets: Vec<String>) -> Self {
        Self {
            backend,
            buckets,
            discovered: Mutex::new(None),
        }
    }

    /// The bucket that accepted the last upload.
    pub fn discovered_bucket(&self) -> Option<String> {
        self.discovered.lock().ok()?.clone()
    }

    fn candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = self.discovered_bucket().into_iter().collect();
        for bucket in &self.buckets {
            if !candidates.contains(bucket) {
                candidates.push(bucket.clone());
            }
        }
        candidates
    }

    pub async fn upload(&self, owner: Uuid, file: MediaFile) -> MediaItem {
        let kind = MediaKind::from_mime(&file.content_type);
        let path = object_path(owner, &file.name);

        for bucket in self.candidates() {
            match self
                .backend
                .upload(&bucket, &path, file.bytes.clone(), &file.content_type)
                .await
            {
                Ok(url) => {
                    debug!("Uploaded {} to bucket '{}'", path, bucket);
                    if let Ok(mut discovered) = self.discovered.lock() {
                        *discovered = Some(bucket);
                    }
                    return MediaItem {
                        url,
                        kind,
                        inline: false,
                    };
                }
                Err(e) => debug!("Bucket '{}' rejected upload: {}", bucket, e),
            }
        }

        warn!("No storage bucket accepted {}, embedding it inline", file.name);
        MediaItem {
            url: data_url(&file.content_type, &file.bytes),
            kind,
            inline: true,
        }
    }

    pub async fn upload_all(&self, owner: Uuid, files: Vec<MediaFile>) -> Vec<MediaItem> {
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            items.push(self.upload(owner, file).await);
        }
        if !items.is_empty() {
            info!("Prepared {} attachments", items.len());
        }
        items
    }
}

/// `{owner}/{millis}-{name}`, with the name reduced to safe characters.
fn object_path(owner: Uuid, name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = if name.trim_matches('.').is_empty() {
        "arquivo".to_string()
    } else {
        name
    };
    format!("{}/{}-{}", owner, Utc::now().timestamp_millis(), name)
}

fn data_url(content_type: &str, bytes: &[u8]) -> String {
    let mime = if content_type.is_empty() {
        "application/octet-stream"
    } else {
        content_type
    };
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_paths_are_namespaced_and_sanitized() {
        let owner = Uuid::new_v4();
        let path = object_path(owner, "minha foto/../x.png");
        let (prefix, rest) = path.split_once('/').unwrap();
        assert_eq!(prefix, owner.to_string());
        assert!(rest.ends_with("-minha_foto_.._x.png"));
        assert!(!rest.contains('/'));
        assert!(object_path(owner, "..").ends_with("-arquivo"));
    }

    #[test]
    fn data_urls_carry_the_mime_type() {
        assert_eq!(data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
        assert!(data_url("", b"").starts_with("data:application/octet-stream;base64,"));
    }
}
