use async_trait::async_trait;
use log::{error, info, warn};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{MediaBackendKind, Settings};

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("not_found")]
    NotFound,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("other: {0}")]
    Other(String),
}

/// Byte storage for uploaded pictures and their derived variants, keyed by
/// relative slash-separated paths such as `ideas/2024/05/<uuid>.png`.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Write (or overwrite) `path`.
    async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), MediaStoreError>;
    async fn load(&self, path: &str) -> Result<(Vec<u8>, String), MediaStoreError>;
    /// Remove `path`; `NotFound` when nothing was stored there.
    async fn delete(&self, path: &str) -> Result<(), MediaStoreError>;
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

/// Reject absolute paths and parent-directory hops.
fn checked_relative(path: &str) -> Result<&Path, MediaStoreError> {
    let p = Path::new(path);
    if path.is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(MediaStoreError::InvalidPath(path.to_string()));
    }
    Ok(p)
}

// ---------------- Filesystem implementation ----------------
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, MediaStoreError> {
        Ok(self.root.join(checked_relative(path)?))
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), MediaStoreError> {
        let full = self.full_path(path)?;
        if let Some(dir) = full.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| MediaStoreError::Other(e.to_string()))?;
        }
        tokio::fs::write(&full, bytes).await.map_err(|e| {
            error!("write failed path={} err={e}", full.display());
            MediaStoreError::Other(e.to_string())
        })
    }

    async fn load(&self, path: &str) -> Result<(Vec<u8>, String), MediaStoreError> {
        let full = self.full_path(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => {
                let mime = sniff_mime(&bytes);
                Ok((bytes, mime))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MediaStoreError::NotFound),
            Err(e) => Err(MediaStoreError::Other(e.to_string())),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), MediaStoreError> {
        let full = self.full_path(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MediaStoreError::NotFound),
            Err(e) => Err(MediaStoreError::Other(e.to_string())),
        }
    }
}

// ---------------- S3 implementation (MinIO compatible) ----------------
pub struct S3MediaStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

impl S3MediaStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "ideabox-media".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style addressing: MinIO/local endpoints have no wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf).force_path_style(true).build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO media client (path-style addressing enabled)");

        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) if attempt >= max_attempts => {
                        error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                        return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                    }
                    Err(e2) => {
                        let backoff_ms = 200 * attempt.pow(2);
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(u64::from(backoff_ms))).await;
                    }
                }
            }
        }

        Ok(Self { bucket, client, prefix: "media".into() })
    }

    fn key_for(&self, path: &str) -> Result<String, MediaStoreError> {
        checked_relative(path)?;
        Ok(format!("{}/{}", self.prefix, path))
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), MediaStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let key = self.key_for(path)?;
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(sniff_mime(bytes));
        if let Err(e) = put.send().await {
            error!("put_object failed key={key} bucket={} err={:?}", self.bucket, e);
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(MediaStoreError::Other(format!("{e}{hint}")));
        }
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<(Vec<u8>, String), MediaStoreError> {
        let key = self.key_for(path)?;
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|_| MediaStoreError::NotFound)?;
        let data = obj.body.collect().await.map_err(|e| MediaStoreError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }

    async fn delete(&self, path: &str) -> Result<(), MediaStoreError> {
        let key = self.key_for(path)?;
        // S3 deletes are idempotent; a missing key is not reported
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| MediaStoreError::Other(e.to_string()))?;
        Ok(())
    }
}

/// Build the configured media backend.
pub async fn build_media_store(settings: &Settings) -> anyhow::Result<Arc<dyn MediaStore>> {
    Ok(match settings.media_backend {
        MediaBackendKind::Fs => {
            info!("Using filesystem media store at {}", settings.media_root.display());
            Arc::new(FsMediaStore::new(&settings.media_root))
        }
        MediaBackendKind::S3 => Arc::new(S3MediaStore::new().await?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_paths() {
        assert!(checked_relative("../etc/passwd").is_err());
        assert!(checked_relative("/abs").is_err());
        assert!(checked_relative("").is_err());
        assert!(checked_relative("ideas/2024/05/a.png").is_ok());
    }

    #[tokio::test]
    async fn fs_delete_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());
        store.save("ideas/a.txt", b"x").await.unwrap();
        assert!(store.delete("ideas/a.txt").await.is_ok());
        assert!(matches!(store.delete("ideas/a.txt").await, Err(MediaStoreError::NotFound)));
    }
}
