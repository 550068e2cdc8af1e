//! Reference resolution for serving.
//!
//! Turns a persisted reference string into something servable: a local
//! file path, a redirectable URL, or not-found. The local tier is
//! preferred; a miss with the remote tier registered returns a signed
//! (or public) URL immediately and enqueues a background backfill, so
//! the caller never waits for the cache to warm.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::reference::{AttachmentRef, ObjectKey};
use crate::sync::SyncPool;
use crate::tier::{LocalTier, RemoteTier};

/// Result of resolving a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Serve by redirecting to (or passing through) this URL.
    Url(String),
    /// Serve this file from the local tier.
    File(PathBuf),
    /// Unknown, unsafe, or missing reference.
    NotFound,
}

/// Resolves references against both tiers.
pub struct ReadResolver {
    local: Arc<LocalTier>,
    remote: Option<Arc<RemoteTier>>,
    sync: Option<Arc<SyncPool>>,
}

impl ReadResolver {
    /// Create a resolver. The sync pool is only used when the remote
    /// tier is registered.
    #[must_use]
    pub fn new(
        local: Arc<LocalTier>,
        remote: Option<Arc<RemoteTier>>,
        sync: Option<Arc<SyncPool>>,
    ) -> Self {
        Self { local, remote, sync }
    }

    /// Resolve a raw reference string.
    ///
    /// Parse failures and path-unsafe references resolve to
    /// [`Resolved::NotFound`]; they are never followed and never raise.
    pub async fn resolve(&self, raw: &str) -> Resolved {
        let parsed = match AttachmentRef::parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(reference = raw, error = %e, "unresolvable reference");
                return Resolved::NotFound;
            }
        };

        match parsed {
            AttachmentRef::External(_) => match parsed.external_url() {
                Some(url) => Resolved::Url(url),
                None => Resolved::NotFound,
            },
            AttachmentRef::Stored(key) => self.resolve_stored(&key).await,
        }
    }

    async fn resolve_stored(&self, key: &ObjectKey) -> Resolved {
        // Local first: the token as persisted, then the candidate under
        // the remote namespace (references migrated between tiers).
        for candidate in self.local_candidates(key) {
            if let Some(path) = self.local.resolve(&candidate) {
                return Resolved::File(path);
            }
        }

        let Some(remote) = &self.remote else {
            return Resolved::NotFound;
        };

        let remote_key = remote.managed_key(key);
        if let Some(url) = remote.public_url(&remote_key) {
            self.enqueue_backfill(remote_key);
            return Resolved::Url(url);
        }

        match remote.presign_get(&remote_key).await {
            Ok(presigned) => {
                self.enqueue_backfill(remote_key);
                Resolved::Url(presigned.url)
            }
            Err(e) => {
                warn!(key = %remote_key, error = %e, "signing download URL failed");
                Resolved::NotFound
            }
        }
    }

    fn local_candidates(&self, key: &ObjectKey) -> Vec<ObjectKey> {
        let mut candidates = vec![key.clone()];
        if let Some(remote) = &self.remote {
            let prefixed = remote.managed_key(key);
            if prefixed != *key {
                candidates.push(prefixed);
            }
        }
        candidates
    }

    fn enqueue_backfill(&self, key: ObjectKey) {
        if let Some(sync) = &self.sync {
            sync.enqueue(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::RemoteConfig;
    use opendal::{Operator, services};
    use tempfile::TempDir;

    fn fs_remote(root: &std::path::Path, public: bool) -> Arc<RemoteTier> {
        let builder = services::Fs::default().root(root.to_str().unwrap());
        let op = Operator::new(builder).unwrap().finish();
        let mut config =
            RemoteConfig::new("http://127.0.0.1:9000", "stockroom", "ak", "sk", "auto");
        if public {
            config = config
                .with_public_read(true)
                .with_public_base_url("https://cdn.example.com");
        }
        Arc::new(RemoteTier::from_operator(op, config))
    }

    #[tokio::test]
    async fn external_refs_pass_through_without_tier_io() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(dir.path()).unwrap());
        let resolver = ReadResolver::new(local, None, None);

        assert_eq!(
            resolver.resolve("https://cdn.example.com/x.png").await,
            Resolved::Url("https://cdn.example.com/x.png".to_string())
        );
        assert_eq!(
            resolver.resolve("//cdn.example.com/x.png").await,
            Resolved::Url("https://cdn.example.com/x.png".to_string())
        );
    }

    #[tokio::test]
    async fn unsafe_references_are_not_found() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(dir.path()).unwrap());
        let resolver = ReadResolver::new(local, None, None);

        assert_eq!(resolver.resolve("../../etc/passwd").await, Resolved::NotFound);
        assert_eq!(resolver.resolve("/etc/passwd").await, Resolved::NotFound);
        assert_eq!(resolver.resolve("").await, Resolved::NotFound);
    }

    #[tokio::test]
    async fn local_hit_serves_the_file() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(dir.path()).unwrap());
        let key = ObjectKey::parse("a.png").unwrap();
        local.put(&key, b"png".to_vec()).await.unwrap();

        let resolver = ReadResolver::new(Arc::clone(&local), None, None);
        let Resolved::File(path) = resolver.resolve("a.png").await else {
            panic!("expected local file");
        };
        assert!(path.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn prefixed_local_copy_satisfies_bare_reference() {
        let local_dir = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(local_dir.path()).unwrap());
        let remote = fs_remote(remote_dir.path(), false);

        // A lazily-synced copy lives under the remote namespace locally.
        let prefixed = ObjectKey::parse("media/b.png").unwrap();
        local.put(&prefixed, b"png".to_vec()).await.unwrap();

        let resolver = ReadResolver::new(local, Some(remote), None);
        assert!(matches!(resolver.resolve("b.png").await, Resolved::File(_)));
    }

    #[tokio::test]
    async fn miss_without_remote_is_not_found() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(dir.path()).unwrap());
        let resolver = ReadResolver::new(local, None, None);

        assert_eq!(resolver.resolve("missing.png").await, Resolved::NotFound);
    }

    #[tokio::test]
    async fn miss_with_public_remote_returns_url_and_enqueues_backfill() {
        let local_dir = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(local_dir.path()).unwrap());
        let remote = fs_remote(remote_dir.path(), true);

        let key = ObjectKey::parse("media/c.png").unwrap();
        remote.put(&key, b"png".to_vec()).await.unwrap();

        let pool = SyncPool::start(Arc::clone(&local), Arc::clone(&remote), 16, 1);
        let resolver = ReadResolver::new(
            Arc::clone(&local),
            Some(remote),
            Some(Arc::clone(&pool)),
        );

        let resolved = resolver.resolve("media/c.png").await;
        assert_eq!(
            resolved,
            Resolved::Url("https://cdn.example.com/media/c.png".to_string())
        );

        // Drain the pool: the local cache is now warm.
        pool.shutdown().await;
        assert_eq!(pool.counters().completed(), 1);
        assert_eq!(local.get(&key).await.unwrap().unwrap(), b"png");
    }
}
