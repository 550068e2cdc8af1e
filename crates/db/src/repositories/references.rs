//! Live-reference scan backing media garbage collection.
//!
//! The media crate asks for every reference string the entity layer
//! currently holds. Primary-image columns are always mirrored into
//! the attachment list by [`super::AttachmentRecordRepository`], so one
//! pass over `members.photo` plus the attachment table covers every
//! holder. Both reads run inside a single transaction; the GC grace
//! window absorbs races with concurrent writers.

use std::collections::HashSet;

use sea_orm::{DatabaseConnection, EntityTrait, QuerySelect, TransactionTrait};
use tracing::debug;

use stockroom_media::error::MediaError;
use stockroom_media::reach::ReferenceSource;

use crate::entities::{attachments, members};

/// [`ReferenceSource`] reading from the relational store.
#[derive(Debug, Clone)]
pub struct SqlReferenceSource {
    db: DatabaseConnection,
}

impl SqlReferenceSource {
    /// Create a new reference source.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl ReferenceSource for SqlReferenceSource {
    async fn live_references(&self) -> Result<HashSet<String>, MediaError> {
        let txn = self.db.begin().await.map_err(source_err)?;

        let photos: Vec<Option<String>> = members::Entity::find()
            .select_only()
            .column(members::Column::Photo)
            .into_tuple()
            .all(&txn)
            .await
            .map_err(source_err)?;

        let listed: Vec<String> = attachments::Entity::find()
            .select_only()
            .column(attachments::Column::Reference)
            .into_tuple()
            .all(&txn)
            .await
            .map_err(source_err)?;

        txn.commit().await.map_err(source_err)?;

        let mut live: HashSet<String> = HashSet::with_capacity(photos.len() + listed.len());
        live.extend(photos.into_iter().flatten().filter(|r| !r.trim().is_empty()));
        live.extend(listed.into_iter().filter(|r| !r.trim().is_empty()));
        debug!(count = live.len(), "scanned live reference strings");
        Ok(live)
    }
}

fn source_err(e: sea_orm::DbErr) -> MediaError {
    MediaError::source(e.to_string())
}
