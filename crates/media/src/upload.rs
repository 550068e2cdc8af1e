//! Server-mediated upload coordination.
//!
//! Validation happens before any I/O. When the remote tier is registered
//! writes go remote-first; any remote failure is logged and absorbed by
//! falling back to the local tier, so a transient outage never fails a
//! user-facing write while local disk is available.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::MediaError;
use crate::reference::{AttachmentRef, ObjectKey};
use crate::tier::{LocalTier, RemoteTier};

/// Extensions accepted for upload: images, video, audio.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    // Images
    "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", // Video
    "mp4", "webm", "mov", "mkv", // Audio
    "mp3", "ogg", "wav", "m4a", "flac",
];

/// Upload validation policy shared by the coordinator and the direct
/// upload broker.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Maximum accepted size in bytes.
    pub max_bytes: u64,
    /// Allowed lowercase file extensions.
    pub allowed_extensions: Vec<String>,
}

impl UploadPolicy {
    /// Default maximum upload size: 16 MiB.
    pub const DEFAULT_MAX_BYTES: u64 = 16 * 1024 * 1024;

    /// Policy with the default size cap and extension allow-list.
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Validate filename extension and declared size. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` or `TooLarge`.
    pub fn validate(&self, filename: &str, size: u64) -> Result<(), MediaError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext {
            Some(ext) if self.allowed_extensions.iter().any(|a| *a == ext) => {}
            _ => return Err(MediaError::unsupported_type(filename)),
        }
        if size > self.max_bytes {
            return Err(MediaError::too_large(size, self.max_bytes));
        }
        Ok(())
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BYTES)
    }
}

/// Generator for collision-resistant stored names.
///
/// Names are the sanitized original stem plus a strictly monotonic
/// nanosecond timestamp, so concurrent writers never target the same
/// path.
#[derive(Debug, Default)]
pub struct StoredNameGenerator {
    last_stamp: AtomicU64,
}

impl StoredNameGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a stored name for an original filename.
    #[must_use]
    pub fn generate(&self, original_filename: &str) -> String {
        let path = Path::new(original_filename);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map_or_else(|| "upload".to_string(), sanitize);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let stamp = self.next_stamp();
        match ext {
            Some(ext) => format!("{stem}_{stamp}.{ext}"),
            None => format!("{stem}_{stamp}"),
        }
    }

    fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        self.last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .map_or(now, |prev| now.max(prev + 1))
    }
}

/// Keep stored names to ASCII alphanumerics, dots, hyphens, underscores.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Coordinates server-mediated uploads across tiers.
pub struct UploadCoordinator {
    local: Arc<LocalTier>,
    remote: Option<Arc<RemoteTier>>,
    policy: UploadPolicy,
    names: StoredNameGenerator,
}

impl UploadCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        local: Arc<LocalTier>,
        remote: Option<Arc<RemoteTier>>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            local,
            remote,
            policy,
            names: StoredNameGenerator::new(),
        }
    }

    /// The validation policy.
    #[must_use]
    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Root directory of the local tier.
    #[must_use]
    pub fn local_root(&self) -> &Path {
        self.local.root()
    }

    /// Whether a remote tier is registered.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Store raw upload bytes and return the reference to persist.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` or `TooLarge` before any I/O, or a
    /// storage error when both tiers fail.
    pub async fn store(
        &self,
        bytes: Vec<u8>,
        original_filename: &str,
        content_type: &str,
    ) -> Result<AttachmentRef, MediaError> {
        self.policy
            .validate(original_filename, bytes.len() as u64)?;

        let stored_name = self.names.generate(original_filename);
        let bare = ObjectKey::parse(&stored_name)
            .map_err(|e| MediaError::operation(format!("generated name: {e}")))?;

        // Refcounted so the fallback path reuses the payload without
        // copying it.
        let bytes = bytes::Bytes::from(bytes);
        if let Some(remote) = &self.remote {
            let key = remote.managed_key(&bare);
            match remote.put(&key, bytes.clone()).await {
                Ok(()) => {
                    debug!(key = %key, content_type, "upload stored in remote tier");
                    return Ok(AttachmentRef::Stored(key));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "remote put failed, falling back to local tier");
                }
            }
        }

        self.local.put(&bare, bytes).await?;
        debug!(key = %bare, content_type, "upload stored in local tier");
        Ok(AttachmentRef::Stored(bare))
    }
}
