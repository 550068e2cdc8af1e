//! Storage tiers.
//!
//! Both tiers expose the same four operations (put/get/delete/list) over
//! path-safe [`ObjectKey`](crate::reference::ObjectKey)s. The local tier
//! additionally resolves keys to filesystem paths; the remote tier
//! additionally signs URLs. The remote tier is an optional capability:
//! when its configuration is incomplete only the local tier is
//! registered and callers check `Option<Arc<RemoteTier>>`.

mod local;
mod remote;

pub use local::LocalTier;
pub use remote::{PresignedUrl, RemoteConfig, RemoteTier};

use chrono::{DateTime, Utc};

use crate::reference::ObjectKey;

/// Last-modified time of a backend entry as a UTC time.
pub(crate) fn modified_at(meta: &opendal::Metadata) -> Option<DateTime<Utc>> {
    meta.last_modified()
        .map(|t| DateTime::<Utc>::from(std::time::SystemTime::from(t)))
}

/// A physically present object in one tier, as reported by `list`.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Key of the object within the tier.
    pub key: ObjectKey,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified time, when the backend reports one.
    pub modified: Option<DateTime<Utc>>,
}

impl StoredObject {
    /// Age of the object relative to `now`, when a modification time is
    /// known.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.modified.map(|m| now - m)
    }
}
