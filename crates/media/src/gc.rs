//! Grace-windowed garbage collection.
//!
//! Deletes stored objects no longer referenced by any entity, in both
//! tiers. An orphan younger than the grace window is spared: it may be
//! an upload whose owning entity's write has not yet committed or been
//! observed by the collector. Re-referencing before the window expires
//! needs no explicit transition; the next pass simply finds the object
//! live again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::MediaError;
use crate::reference::ObjectKey;
use crate::tier::{LocalTier, RemoteTier, StoredObject};

/// Outcome of one garbage-collection pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    /// Objects inspected across both tiers.
    pub scanned: usize,
    /// Objects deleted from the local tier.
    pub deleted_local: usize,
    /// Objects deleted from the remote tier.
    pub deleted_remote: usize,
    /// Orphans spared by the grace window.
    pub spared: usize,
    /// Per-object failures (logged, siblings unaffected).
    pub failed: usize,
}

/// Garbage collector over both storage tiers.
pub struct GarbageCollector {
    local: Arc<LocalTier>,
    remote: Option<Arc<RemoteTier>>,
}

impl GarbageCollector {
    /// Create a collector.
    #[must_use]
    pub fn new(local: Arc<LocalTier>, remote: Option<Arc<RemoteTier>>) -> Self {
        Self { local, remote }
    }

    /// Run one pass: delete every object absent from `live` and older
    /// than `grace`.
    ///
    /// # Errors
    ///
    /// Returns an error only when a tier cannot be listed at all;
    /// per-object failures are counted in the stats.
    pub async fn run(
        &self,
        live: &HashSet<ObjectKey>,
        grace: Duration,
    ) -> Result<GcStats, MediaError> {
        let live = self.expand_live(live);
        let now = Utc::now();
        let mut stats = GcStats::default();

        let local_objects = self.local.list("").await?;
        for object in local_objects {
            stats.scanned += 1;
            if live.contains(&object.key) {
                continue;
            }
            if within_grace(&object, grace, now) {
                stats.spared += 1;
                continue;
            }
            match self.local.delete(&object.key).await {
                Ok(()) => stats.deleted_local += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(key = %object.key, error = %e, "gc: local delete failed");
                }
            }
        }

        if let Some(remote) = &self.remote {
            let remote_objects = remote.list(remote.prefix(), 1000).await?;
            for object in remote_objects {
                stats.scanned += 1;
                if live.contains(&object.key) {
                    continue;
                }
                if within_grace(&object, grace, now) {
                    stats.spared += 1;
                    continue;
                }
                match remote.delete(&object.key).await {
                    Ok(()) => stats.deleted_remote += 1,
                    Err(e) => {
                        stats.failed += 1;
                        warn!(key = %object.key, error = %e, "gc: remote delete failed");
                    }
                }
            }
        }

        if let Err(e) = self.local.remove_empty_dirs() {
            warn!(error = %e, "gc: pruning empty directories failed");
        }

        info!(
            scanned = stats.scanned,
            deleted_local = stats.deleted_local,
            deleted_remote = stats.deleted_remote,
            spared = stats.spared,
            failed = stats.failed,
            "garbage collection pass complete"
        );
        Ok(stats)
    }

    /// A persisted reference may name an object with or without the
    /// remote namespace prefix; a physical object is live if any form
    /// of its key is referenced.
    fn expand_live(&self, live: &HashSet<ObjectKey>) -> HashSet<ObjectKey> {
        let Some(remote) = &self.remote else {
            return live.clone();
        };
        let prefix = remote.prefix();
        let mut expanded = HashSet::with_capacity(live.len() * 2);
        for key in live {
            if let Some(stripped) = key.strip_prefix(prefix) {
                expanded.insert(stripped);
            } else {
                expanded.insert(key.with_prefix(prefix));
            }
            expanded.insert(key.clone());
        }
        expanded
    }
}

fn within_grace(object: &StoredObject, grace: Duration, now: chrono::DateTime<Utc>) -> bool {
    if grace.is_zero() {
        return false;
    }
    let Ok(grace) = chrono::Duration::from_std(grace) else {
        return true; // absurdly large grace spares everything
    };
    // Unknown mtime is treated as fresh: better to spare an orphan for
    // one more pass than to break a racing upload.
    object.age(now).is_none_or(|age| age < grace)
}
