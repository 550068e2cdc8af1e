//! Lazy-sync worker pool.
//!
//! Backfills the local tier from the remote tier outside the request
//! path. Jobs flow through a bounded queue into a small pool of worker
//! tasks; a full queue drops the job (the next read simply re-enqueues
//! it) and failures are counted and logged, never surfaced.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::reference::ObjectKey;
use crate::tier::{LocalTier, RemoteTier};

/// Counters exposed for observability and tests.
#[derive(Debug, Default)]
pub struct SyncCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl SyncCounters {
    /// Jobs that copied an object into the local tier.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Jobs that failed (logged and discarded).
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Jobs rejected because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Bounded background worker pool for remote-to-local backfill.
pub struct SyncPool {
    tx: std::sync::Mutex<Option<mpsc::Sender<ObjectKey>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<SyncCounters>,
}

impl SyncPool {
    /// Start `workers` tasks consuming a queue of `capacity` jobs.
    #[must_use]
    pub fn start(
        local: Arc<LocalTier>,
        remote: Arc<RemoteTier>,
        capacity: usize,
        workers: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<ObjectKey>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(SyncCounters::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for _ in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let local = Arc::clone(&local);
            let remote = Arc::clone(&remote);
            let counters = Arc::clone(&counters);
            handles.push(tokio::spawn(async move {
                loop {
                    let Some(key) = rx.lock().await.recv().await else {
                        break;
                    };
                    run_job(&local, &remote, &key, &counters).await;
                }
            }));
        }

        Arc::new(Self {
            tx: std::sync::Mutex::new(Some(tx)),
            handles: std::sync::Mutex::new(handles),
            counters,
        })
    }

    /// Enqueue a backfill job without blocking. A full queue drops the
    /// job with a warning.
    pub fn enqueue(&self, key: ObjectKey) {
        let guard = self.tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return; // shut down
        };
        match tx.try_send(key) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(key)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, "lazy-sync queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Counters for observability.
    #[must_use]
    pub fn counters(&self) -> &SyncCounters {
        &self.counters
    }

    /// Close the queue and drain the workers.
    pub async fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        drop(tx);
        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Copy one object from the remote tier into the local tier. Duplicate
/// jobs for the same key write identical content, so last-writer-wins
/// needs no locking.
async fn run_job(local: &LocalTier, remote: &RemoteTier, key: &ObjectKey, counters: &SyncCounters) {
    let bytes = match remote.get(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "lazy sync: object vanished from remote tier");
            return;
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "lazy sync: remote fetch failed");
            return;
        }
    };

    match local.put(key, bytes).await {
        Ok(()) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "lazy sync: local cache warmed");
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "lazy sync: local write failed");
        }
    }
}
