//! Startup and periodic housekeeping.
//!
//! Orchestrates the warm-sync and garbage-collection passes on
//! background tasks so server readiness is never delayed. Startup work
//! is guarded to run once per process even when a supervisor spawns a
//! monitor/worker pair that both reach the wiring code.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::MediaError;
use crate::gc::GarbageCollector;
use crate::reach::{ReferenceSource, collect_live};
use crate::tier::{LocalTier, RemoteTier};

/// Process-wide guard: startup housekeeping runs once.
static STARTED: AtomicBool = AtomicBool::new(false);

/// Housekeeping runtime options.
#[derive(Debug, Clone)]
pub struct HousekeepingOptions {
    /// Warm-sync the local tier from the remote tier on startup.
    pub sync_on_start: bool,
    /// Run one GC pass on startup.
    pub cleanup_on_start: bool,
    /// Orphan grace window.
    pub grace: Duration,
    /// Remote listing page size during warm-sync.
    pub sync_page_size: usize,
    /// Periodic GC interval (disabled when `None`).
    pub gc_interval: Option<Duration>,
    /// Periodic warm-sync interval (disabled when `None`).
    pub sync_interval: Option<Duration>,
}

impl Default for HousekeepingOptions {
    fn default() -> Self {
        Self {
            sync_on_start: false,
            cleanup_on_start: false,
            grace: Duration::from_secs(86400),
            sync_page_size: 1000,
            gc_interval: None,
            sync_interval: None,
        }
    }
}

/// Outcome of one warm-sync pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct WarmSyncStats {
    /// Remote objects inspected.
    pub scanned: usize,
    /// Objects copied into the local tier.
    pub copied: usize,
    /// Objects skipped because the local copy already matched.
    pub skipped: usize,
    /// Per-object failures.
    pub failed: usize,
}

/// Orchestrates housekeeping passes over the tiers.
pub struct Housekeeping<S: ReferenceSource> {
    local: Arc<LocalTier>,
    remote: Option<Arc<RemoteTier>>,
    source: Arc<S>,
    options: HousekeepingOptions,
}

impl<S: ReferenceSource + 'static> Housekeeping<S> {
    /// Create a housekeeping orchestrator.
    #[must_use]
    pub fn new(
        local: Arc<LocalTier>,
        remote: Option<Arc<RemoteTier>>,
        source: Arc<S>,
        options: HousekeepingOptions,
    ) -> Self {
        Self {
            local,
            remote,
            source,
            options,
        }
    }

    /// Spawn startup passes and periodic triggers on background tasks.
    ///
    /// Idempotent per process: the second and later calls are no-ops.
    pub fn spawn(self: Arc<Self>) {
        if STARTED.swap(true, Ordering::SeqCst) {
            info!("housekeeping already started in this process, skipping");
            return;
        }

        let startup = Arc::clone(&self);
        tokio::spawn(async move {
            if startup.options.sync_on_start {
                match startup.warm_sync().await {
                    Ok(stats) => info!(
                        scanned = stats.scanned,
                        copied = stats.copied,
                        skipped = stats.skipped,
                        failed = stats.failed,
                        "startup warm-sync complete"
                    ),
                    Err(e) => error!(error = %e, "startup warm-sync failed"),
                }
            }
            if startup.options.cleanup_on_start {
                startup.gc_pass().await;
            }
        });

        if let Some(interval) = self.options.gc_interval {
            let periodic = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // immediate first tick, skip it
                loop {
                    ticker.tick().await;
                    periodic.gc_pass().await;
                }
            });
        }

        if let Some(interval) = self.options.sync_interval {
            let periodic = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = periodic.warm_sync().await {
                        error!(error = %e, "periodic warm-sync failed");
                    }
                }
            });
        }
    }

    /// Copy remote objects missing (or size-mismatched) locally, using
    /// a paginated remote listing.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote tier cannot be listed;
    /// per-object failures are counted instead.
    pub async fn warm_sync(&self) -> Result<WarmSyncStats, MediaError> {
        let Some(remote) = &self.remote else {
            return Ok(WarmSyncStats::default());
        };

        let mut stats = WarmSyncStats::default();
        let objects = remote
            .list(remote.prefix(), self.options.sync_page_size)
            .await?;

        for object in objects {
            stats.scanned += 1;
            match self.local.stat(&object.key).await {
                Ok(Some(existing)) if existing.size == object.size => {
                    stats.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    stats.failed += 1;
                    warn!(key = %object.key, error = %e, "warm-sync: local stat failed");
                    continue;
                }
            }

            let copied = match remote.get(&object.key).await {
                Ok(Some(bytes)) => self.local.put(&object.key, bytes).await,
                Ok(None) => continue, // deleted between list and get
                Err(e) => Err(e),
            };
            match copied {
                Ok(()) => stats.copied += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(key = %object.key, error = %e, "warm-sync: copy failed");
                }
            }
        }
        Ok(stats)
    }

    /// One collect-then-sweep pass; failures are logged, never
    /// propagated to the owning task's loop.
    pub async fn gc_pass(&self) {
        let live = match collect_live(self.source.as_ref()).await {
            Ok(live) => live,
            Err(e) => {
                error!(error = %e, "gc pass skipped: collecting live references failed");
                return;
            }
        };
        let gc = GarbageCollector::new(Arc::clone(&self.local), self.remote.clone());
        if let Err(e) = gc.run(&live, self.options.grace).await {
            error!(error = %e, "gc pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reach::testing::FixedSource;
    use crate::reference::ObjectKey;
    use crate::tier::RemoteConfig;
    use opendal::{Operator, services};
    use tempfile::TempDir;

    fn fs_remote(root: &std::path::Path) -> Arc<RemoteTier> {
        let builder = services::Fs::default().root(root.to_str().unwrap());
        let op = Operator::new(builder).unwrap().finish();
        Arc::new(RemoteTier::from_operator(
            op,
            RemoteConfig::new("http://127.0.0.1:9000", "stockroom", "ak", "sk", "auto"),
        ))
    }

    #[tokio::test]
    async fn warm_sync_copies_missing_and_skips_matching() {
        let local_dir = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(local_dir.path()).unwrap());
        let remote = fs_remote(remote_dir.path());

        let missing = ObjectKey::parse("media/missing.png").unwrap();
        let synced = ObjectKey::parse("media/synced.png").unwrap();
        remote.put(&missing, b"abcd".to_vec()).await.unwrap();
        remote.put(&synced, b"efgh".to_vec()).await.unwrap();
        local.put(&synced, b"efgh".to_vec()).await.unwrap();

        let housekeeping = Housekeeping::new(
            Arc::clone(&local),
            Some(remote),
            Arc::new(FixedSource::new([])),
            HousekeepingOptions::default(),
        );
        let stats = housekeeping.warm_sync().await.unwrap();

        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.copied, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(local.get(&missing).await.unwrap().unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn warm_sync_recopies_size_mismatch() {
        let local_dir = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(local_dir.path()).unwrap());
        let remote = fs_remote(remote_dir.path());

        let key = ObjectKey::parse("media/truncated.png").unwrap();
        remote.put(&key, b"full content".to_vec()).await.unwrap();
        local.put(&key, b"part".to_vec()).await.unwrap();

        let housekeeping = Housekeeping::new(
            Arc::clone(&local),
            Some(remote),
            Arc::new(FixedSource::new([])),
            HousekeepingOptions::default(),
        );
        let stats = housekeeping.warm_sync().await.unwrap();

        assert_eq!(stats.copied, 1);
        assert_eq!(local.get(&key).await.unwrap().unwrap(), b"full content");
    }

    #[tokio::test]
    async fn warm_sync_without_remote_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(dir.path()).unwrap());
        let housekeeping = Housekeeping::new(
            local,
            None,
            Arc::new(FixedSource::new([])),
            HousekeepingOptions::default(),
        );
        let stats = housekeeping.warm_sync().await.unwrap();
        assert_eq!(stats.scanned, 0);
    }

    #[tokio::test]
    async fn gc_pass_reclaims_detached_references() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalTier::new(dir.path()).unwrap());
        let kept = ObjectKey::parse("kept.png").unwrap();
        let dropped = ObjectKey::parse("dropped.png").unwrap();
        local.put(&kept, b"x".to_vec()).await.unwrap();
        local.put(&dropped, b"x".to_vec()).await.unwrap();

        let source = Arc::new(FixedSource::new(["kept.png"]));
        let housekeeping = Housekeeping::new(
            Arc::clone(&local),
            None,
            source,
            HousekeepingOptions {
                grace: Duration::ZERO,
                ..HousekeepingOptions::default()
            },
        );
        housekeeping.gc_pass().await;

        assert!(local.get(&kept).await.unwrap().is_some());
        assert!(local.get(&dropped).await.unwrap().is_none());
    }
}
