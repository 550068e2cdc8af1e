//! Periodic database backups.
//!
//! Takes a page-consistent online snapshot of the live database (not a
//! raw file copy, which would tear under concurrent writers), uploads
//! it to the remote tier under a timestamped key, then prunes snapshots
//! older than the retention age. Overlapping invocations are a silent
//! no-op rather than a queued retry.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::MediaError;
use crate::reference::ObjectKey;
use crate::tier::{RemoteTier, StoredObject};

/// Producer of a consistent database snapshot.
///
/// Implemented by the db crate (SQLite `VACUUM INTO` for a
/// page-consistent copy of a live database).
pub trait SnapshotSource: Send + Sync {
    /// Write a consistent snapshot of the database to `dest`.
    fn snapshot_to(
        &self,
        dest: &Path,
    ) -> impl std::future::Future<Output = Result<(), MediaError>> + Send;
}

/// Backup runtime options.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Remote key prefix for snapshots.
    pub prefix: String,
    /// Maximum snapshot age before pruning (`None` disables pruning).
    pub retention: Option<Duration>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            prefix: "backups".to_string(),
            retention: None,
        }
    }
}

/// Uploads consistent database snapshots to the remote tier.
pub struct BackupService<S: SnapshotSource> {
    remote: Option<Arc<RemoteTier>>,
    source: Arc<S>,
    options: BackupOptions,
    // The only explicit lock in the subsystem: serializes runs.
    guard: Mutex<()>,
}

impl<S: SnapshotSource + 'static> BackupService<S> {
    /// Create a backup service.
    #[must_use]
    pub fn new(remote: Option<Arc<RemoteTier>>, source: Arc<S>, options: BackupOptions) -> Self {
        Self {
            remote,
            source,
            options,
            guard: Mutex::new(()),
        }
    }

    /// Take one snapshot and upload it.
    ///
    /// Returns `None` without a remote tier or while another invocation
    /// is in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot or the upload fails; pruning
    /// failures are logged only.
    pub async fn run(&self) -> Result<Option<ObjectKey>, MediaError> {
        let Some(remote) = &self.remote else {
            info!("backup skipped: no remote tier registered");
            return Ok(None);
        };
        let Ok(_lock) = self.guard.try_lock() else {
            info!("backup skipped: previous run still in flight");
            return Ok(None);
        };

        let scratch = scratch_path();
        let result = self.snapshot_and_upload(remote, &scratch).await;
        if tokio::fs::remove_file(&scratch).await.is_err() {
            // Snapshot may not have been created; nothing to clean.
        }
        let key = result?;
        info!(key = %key, "database backup uploaded");

        if let Some(retention) = self.options.retention.filter(|r| !r.is_zero()) {
            self.prune(remote, retention).await;
        }
        Ok(Some(key))
    }

    async fn snapshot_and_upload(
        &self,
        remote: &RemoteTier,
        scratch: &Path,
    ) -> Result<ObjectKey, MediaError> {
        self.source.snapshot_to(scratch).await?;
        let bytes = tokio::fs::read(scratch)
            .await
            .map_err(|e| MediaError::operation(format!("reading snapshot: {e}")))?;

        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let key = ObjectKey::parse(&format!(
            "{}/stockroom-{stamp}.db",
            self.options.prefix.trim_matches('/')
        ))
        .map_err(|e| MediaError::configuration(format!("backup prefix: {e}")))?;

        remote.put(&key, bytes).await?;
        Ok(key)
    }

    /// Delete snapshots older than the retention age. Per-item failures
    /// are logged and never abort the sweep.
    async fn prune(&self, remote: &RemoteTier, retention: Duration) {
        let objects = match remote.list(&self.options.prefix, 1000).await {
            Ok(objects) => objects,
            Err(e) => {
                error!(error = %e, "backup pruning skipped: listing failed");
                return;
            }
        };
        for key in prune_candidates(&objects, retention, Utc::now()) {
            match remote.delete(&key).await {
                Ok(()) => info!(key = %key, "pruned expired backup"),
                Err(e) => warn!(key = %key, error = %e, "pruning backup failed"),
            }
        }
    }

    /// Spawn on-start and periodic runs on background tasks; failures
    /// are logged and never crash the owning loop.
    pub fn spawn(self: Arc<Self>, on_start: bool, interval: Option<Duration>) {
        if on_start {
            let service = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = service.run().await {
                    error!(error = %e, "startup backup failed");
                }
            });
        }
        if let Some(interval) = interval {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // immediate first tick, skip it
                loop {
                    ticker.tick().await;
                    if let Err(e) = self.run().await {
                        error!(error = %e, "periodic backup failed");
                    }
                }
            });
        }
    }
}

/// Snapshots older than `retention` at `now`. Objects without an mtime
/// are kept.
fn prune_candidates(
    objects: &[StoredObject],
    retention: Duration,
    now: DateTime<Utc>,
) -> Vec<ObjectKey> {
    let Ok(retention) = chrono::Duration::from_std(retention) else {
        return Vec::new();
    };
    objects
        .iter()
        .filter(|o| o.age(now).is_some_and(|age| age > retention))
        .map(|o| o.key.clone())
        .collect()
}

fn scratch_path() -> std::path::PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    std::env::temp_dir().join(format!("stockroom-snapshot-{stamp}.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::RemoteConfig;
    use opendal::{Operator, services};
    use tempfile::TempDir;

    struct FixedSnapshot(Vec<u8>);

    impl SnapshotSource for FixedSnapshot {
        async fn snapshot_to(&self, dest: &Path) -> Result<(), MediaError> {
            tokio::fs::write(dest, &self.0)
                .await
                .map_err(|e| MediaError::operation(e.to_string()))
        }
    }

    struct SlowSnapshot;

    impl SnapshotSource for SlowSnapshot {
        async fn snapshot_to(&self, dest: &Path) -> Result<(), MediaError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tokio::fs::write(dest, b"slow")
                .await
                .map_err(|e| MediaError::operation(e.to_string()))
        }
    }

    fn fs_remote(root: &std::path::Path) -> Arc<RemoteTier> {
        let builder = services::Fs::default().root(root.to_str().unwrap());
        let op = Operator::new(builder).unwrap().finish();
        Arc::new(RemoteTier::from_operator(
            op,
            RemoteConfig::new("http://127.0.0.1:9000", "stockroom", "ak", "sk", "auto"),
        ))
    }

    fn aged(key: &str, days: i64) -> StoredObject {
        StoredObject {
            key: ObjectKey::parse(key).unwrap(),
            size: 100,
            modified: Some(Utc::now() - chrono::Duration::days(days)),
        }
    }

    #[tokio::test]
    async fn uploads_snapshot_under_timestamped_key() {
        let dir = TempDir::new().unwrap();
        let remote = fs_remote(dir.path());
        let service = BackupService::new(
            Some(Arc::clone(&remote)),
            Arc::new(FixedSnapshot(b"sqlite pages".to_vec())),
            BackupOptions::default(),
        );

        let key = service.run().await.unwrap().unwrap();
        assert!(key.as_str().starts_with("backups/stockroom-"));
        assert!(key.as_str().ends_with(".db"));
        assert_eq!(
            remote.get(&key).await.unwrap().unwrap(),
            b"sqlite pages"
        );
    }

    #[tokio::test]
    async fn no_remote_means_silent_no_op() {
        let service = BackupService::new(
            None,
            Arc::new(FixedSnapshot(Vec::new())),
            BackupOptions::default(),
        );
        assert!(service.run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlapping_runs_collapse_to_one() {
        let dir = TempDir::new().unwrap();
        let remote = fs_remote(dir.path());
        let service = Arc::new(BackupService::new(
            Some(remote),
            Arc::new(SlowSnapshot),
            BackupOptions::default(),
        ));

        let a = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.run().await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let b = service.run().await.unwrap();

        assert!(b.is_none());
        assert!(a.await.unwrap().is_some());
    }

    #[test]
    fn retention_prunes_only_expired_snapshots() {
        let objects = vec![
            aged("backups/stockroom-1d.db", 1),
            aged("backups/stockroom-10d.db", 10),
            aged("backups/stockroom-40d.db", 40),
        ];
        let expired = prune_candidates(
            &objects,
            Duration::from_secs(30 * 24 * 3600),
            Utc::now(),
        );
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].as_str(), "backups/stockroom-40d.db");
    }

    #[tokio::test]
    async fn retention_sweep_deletes_expired_uploads() {
        let dir = TempDir::new().unwrap();
        let remote = fs_remote(dir.path());
        // Seed one snapshot "now": retention of 30 days keeps it.
        let service = BackupService::new(
            Some(Arc::clone(&remote)),
            Arc::new(FixedSnapshot(b"pages".to_vec())),
            BackupOptions {
                prefix: "backups".to_string(),
                retention: Some(Duration::from_secs(30 * 24 * 3600)),
            },
        );

        let key = service.run().await.unwrap().unwrap();
        assert!(remote.get(&key).await.unwrap().is_some());
    }
}
