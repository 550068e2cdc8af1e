//! Online database snapshots for backups.
//!
//! `VACUUM INTO` produces a page-consistent copy of a live SQLite
//! database without blocking concurrent readers or writers, unlike a
//! raw file copy which can observe a torn write.

use std::path::Path;

use sea_orm::{ConnectionTrait, DatabaseConnection};
use tracing::debug;

use stockroom_media::backup::SnapshotSource;
use stockroom_media::error::MediaError;

/// [`SnapshotSource`] backed by SQLite `VACUUM INTO`.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotSource {
    db: DatabaseConnection,
}

impl SqliteSnapshotSource {
    /// Create a new snapshot source.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl SnapshotSource for SqliteSnapshotSource {
    async fn snapshot_to(&self, dest: &Path) -> Result<(), MediaError> {
        let path = dest
            .to_str()
            .ok_or_else(|| MediaError::operation("snapshot path is not valid UTF-8"))?;
        // VACUUM INTO refuses to overwrite; callers pass a fresh path.
        let sql = format!("VACUUM INTO '{}';", path.replace('\'', "''"));
        self.db
            .execute_unprepared(&sql)
            .await
            .map_err(|e| MediaError::operation(format!("database snapshot: {e}")))?;
        debug!(dest = %dest.display(), "database snapshot written");
        Ok(())
    }
}
