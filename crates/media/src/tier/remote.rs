//! S3-compatible remote tier.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use opendal::{ErrorKind, Operator, services};
use tracing::debug;
use url::Url;

use super::{StoredObject, modified_at};
use crate::error::MediaError;
use crate::reference::ObjectKey;

/// Remote tier configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// S3-compatible endpoint URL.
    pub endpoint: String,
    /// Bucket name.
    pub bucket: String,
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Region (`auto` for R2-style providers).
    pub region: String,
    /// Key namespace prefix for managed media objects.
    pub prefix: String,
    /// Public-facing base URL substituted into signed URLs.
    pub public_base_url: Option<String>,
    /// Whether objects are publicly readable without signing.
    pub public_read: bool,
    /// Presigned PUT TTL in seconds.
    pub presign_upload_ttl_secs: u64,
    /// Presigned GET TTL in seconds.
    pub presign_download_ttl_secs: u64,
}

impl RemoteConfig {
    /// Default presigned PUT TTL: 15 minutes.
    pub const DEFAULT_UPLOAD_TTL: u64 = 900;
    /// Default presigned GET TTL: 1 hour.
    pub const DEFAULT_DOWNLOAD_TTL: u64 = 3600;

    /// Create a config with default TTLs, a `media` prefix and no
    /// public access.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
            prefix: "media".to_string(),
            public_base_url: None,
            public_read: false,
            presign_upload_ttl_secs: Self::DEFAULT_UPLOAD_TTL,
            presign_download_ttl_secs: Self::DEFAULT_DOWNLOAD_TTL,
        }
    }

    /// Set the managed key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the public-facing base URL.
    #[must_use]
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    /// Mark the bucket publicly readable.
    #[must_use]
    pub fn with_public_read(mut self, public: bool) -> Self {
        self.public_read = public;
        self
    }
}

/// Presigned URL for a direct GET or PUT against the remote store.
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    /// The presigned URL (public base applied when configured).
    pub url: String,
    /// HTTP method to use.
    pub method: String,
    /// Required headers for the request.
    pub headers: HashMap<String, String>,
    /// When the URL expires.
    pub expires_at: DateTime<Utc>,
}

/// Remote object-store tier.
///
/// Constructed once at startup and injected as `Option<Arc<RemoteTier>>`
/// into every component that can use it; absence of configuration means
/// it is simply not registered.
pub struct RemoteTier {
    op: Operator,
    config: RemoteConfig,
}

impl RemoteTier {
    /// Build the tier from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the operator cannot be constructed.
    pub fn from_config(config: RemoteConfig) -> Result<Self, MediaError> {
        let builder = services::S3::default()
            .endpoint(&config.endpoint)
            .bucket(&config.bucket)
            .access_key_id(&config.access_key_id)
            .secret_access_key(&config.secret_access_key)
            .region(&config.region);

        let op = Operator::new(builder)
            .map_err(|e| MediaError::configuration(e.to_string()))?
            .finish();

        Ok(Self { op, config })
    }

    /// Build the tier over an existing operator. Used by tests to back
    /// the remote tier with a filesystem operator.
    #[must_use]
    pub fn from_operator(op: Operator, config: RemoteConfig) -> Self {
        Self { op, config }
    }

    /// The managed key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Place a bare stored name under the managed prefix.
    #[must_use]
    pub fn managed_key(&self, key: &ObjectKey) -> ObjectKey {
        if key.has_prefix(&self.config.prefix) {
            key.clone()
        } else {
            key.with_prefix(&self.config.prefix)
        }
    }

    /// Write object bytes.
    pub async fn put(
        &self,
        key: &ObjectKey,
        bytes: impl Into<bytes::Bytes>,
    ) -> Result<(), MediaError> {
        let bytes = bytes.into();
        debug!(key = %key, size = bytes.len(), "remote tier: put");
        self.op
            .write(key.as_str(), bytes)
            .await
            .map_err(remote_err)?;
        Ok(())
    }

    /// Read object bytes; `None` on miss.
    pub async fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>, MediaError> {
        match self.op.read(key.as_str()).await {
            Ok(buf) => Ok(Some(buf.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(remote_err(e)),
        }
    }

    /// Size and mtime of an object; `None` on miss.
    pub async fn stat(&self, key: &ObjectKey) -> Result<Option<StoredObject>, MediaError> {
        match self.op.stat(key.as_str()).await {
            Ok(meta) => Ok(Some(StoredObject {
                key: key.clone(),
                size: meta.content_length(),
                modified: modified_at(&meta),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(remote_err(e)),
        }
    }

    /// Delete an object. Deleting a missing object is not an error.
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), MediaError> {
        debug!(key = %key, "remote tier: delete");
        self.op.delete(key.as_str()).await.map_err(remote_err)?;
        Ok(())
    }

    /// List every object under `prefix`, fetching `page_size` entries
    /// per backend request.
    pub async fn list(
        &self,
        prefix: &str,
        page_size: usize,
    ) -> Result<Vec<StoredObject>, MediaError> {
        let path = dir_path(prefix);
        let mut lister = self
            .op
            .lister_with(&path)
            .recursive(true)
            .limit(page_size)
            .await
            .map_err(remote_err)?;

        let mut objects = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(remote_err)? {
            if !entry.metadata().mode().is_file() {
                continue;
            }
            let Ok(key) = ObjectKey::parse(entry.path()) else {
                continue;
            };
            let meta = self.op.stat(entry.path()).await.map_err(remote_err)?;
            objects.push(StoredObject {
                key,
                size: meta.content_length(),
                modified: modified_at(&meta),
            });
        }
        Ok(objects)
    }

    /// Presigned GET URL for an object.
    pub async fn presign_get(&self, key: &ObjectKey) -> Result<PresignedUrl, MediaError> {
        let ttl = Duration::from_secs(self.config.presign_download_ttl_secs);
        let presigned = self
            .op
            .presign_read(key.as_str(), ttl)
            .await
            .map_err(remote_err)?;

        Ok(PresignedUrl {
            url: self.apply_public_base(presigned.uri().to_string()),
            method: presigned.method().to_string(),
            headers: HashMap::new(),
            expires_at: expiry(self.config.presign_download_ttl_secs),
        })
    }

    /// Presigned PUT URL for an object, carrying the content type the
    /// client must send.
    pub async fn presign_put(
        &self,
        key: &ObjectKey,
        content_type: &str,
    ) -> Result<PresignedUrl, MediaError> {
        let ttl = Duration::from_secs(self.config.presign_upload_ttl_secs);
        let presigned = self
            .op
            .presign_write(key.as_str(), ttl)
            .await
            .map_err(remote_err)?;

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), content_type.to_string());

        Ok(PresignedUrl {
            url: self.apply_public_base(presigned.uri().to_string()),
            method: presigned.method().to_string(),
            headers,
            expires_at: expiry(self.config.presign_upload_ttl_secs),
        })
    }

    /// Static URL for a publicly readable object, when configured.
    #[must_use]
    pub fn public_url(&self, key: &ObjectKey) -> Option<String> {
        if !self.config.public_read {
            return None;
        }
        let base = self
            .config
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.config.endpoint, self.config.bucket));
        Some(format!("{}/{}", base.trim_end_matches('/'), key))
    }

    /// Rewrite the signed URL's scheme and host to the public-facing
    /// base, keeping path and query (the signature) intact.
    fn apply_public_base(&self, signed: String) -> String {
        let Some(base) = &self.config.public_base_url else {
            return signed;
        };
        let (Ok(mut url), Ok(base)) = (Url::parse(&signed), Url::parse(base)) else {
            return signed;
        };
        if url.set_scheme(base.scheme()).is_err() {
            return signed;
        }
        if url.set_host(base.host_str()).is_err() {
            return signed;
        }
        let _ = url.set_port(base.port());
        url.to_string()
    }
}

/// Normalize a prefix into an OpenDAL directory path.
fn dir_path(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn expiry(ttl_secs: u64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
}

/// Transient remote failures surface as `RemoteUnavailable` so the write
/// path can fall back to the local tier; misses stay `NotFound`.
fn remote_err(err: opendal::Error) -> MediaError {
    match err.kind() {
        ErrorKind::NotFound => MediaError::not_found(err.to_string()),
        ErrorKind::Unsupported => MediaError::configuration(err.to_string()),
        _ => MediaError::remote_unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_remote(root: &std::path::Path) -> RemoteTier {
        let builder = services::Fs::default().root(root.to_str().unwrap());
        let op = Operator::new(builder).unwrap().finish();
        let config = RemoteConfig::new("http://127.0.0.1:9000", "stockroom", "ak", "sk", "auto");
        RemoteTier::from_operator(op, config)
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = fs_remote(dir.path());
        let key = ObjectKey::parse("media/a.jpg").unwrap();

        remote.put(&key, b"bytes".to_vec()).await.unwrap();
        assert_eq!(remote.get(&key).await.unwrap().unwrap(), b"bytes");

        remote.delete(&key).await.unwrap();
        assert!(remote.get(&key).await.unwrap().is_none());
        // Idempotent delete
        remote.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn list_is_scoped_to_prefix() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = fs_remote(dir.path());
        let managed = ObjectKey::parse("media/a.jpg").unwrap();
        let foreign = ObjectKey::parse("other/b.jpg").unwrap();
        remote.put(&managed, vec![1]).await.unwrap();
        remote.put(&foreign, vec![2]).await.unwrap();

        let listed = remote.list("media", 100).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, managed);
    }

    #[test]
    fn managed_key_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = fs_remote(dir.path());
        let bare = ObjectKey::parse("a.jpg").unwrap();
        let once = remote.managed_key(&bare);
        assert_eq!(once.as_str(), "media/a.jpg");
        assert_eq!(remote.managed_key(&once), once);
    }

    #[test]
    fn public_url_requires_public_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut remote = fs_remote(dir.path());
        let key = ObjectKey::parse("media/a.jpg").unwrap();
        assert!(remote.public_url(&key).is_none());

        remote.config.public_read = true;
        remote.config.public_base_url = Some("https://cdn.example.com".to_string());
        assert_eq!(
            remote.public_url(&key).unwrap(),
            "https://cdn.example.com/media/a.jpg"
        );
    }

    #[test]
    fn public_base_rewrites_host_and_keeps_signature() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut remote = fs_remote(dir.path());
        remote.config.public_base_url = Some("https://cdn.example.com".to_string());

        let rewritten = remote.apply_public_base(
            "http://internal:9000/bucket/media/a.jpg?X-Amz-Signature=abc".to_string(),
        );
        assert_eq!(
            rewritten,
            "https://cdn.example.com/bucket/media/a.jpg?X-Amz-Signature=abc"
        );
    }
}
