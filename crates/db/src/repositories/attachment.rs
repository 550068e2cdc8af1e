//! Attachment-record repository.
//!
//! Maintains the ordered attachment list per owning entity and the
//! primary flag. Invariant enforced here: a reference marked primary
//! always also exists as a list row, so the garbage-collection scan
//! only ever needs to read lists.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use stockroom_shared::error::{AppError, AppResult};

use crate::entities::attachments::{self, EntityKind};
use crate::entities::{events, items, locations, members};

/// Attachment-record repository implementation.
#[derive(Debug, Clone)]
pub struct AttachmentRecordRepository {
    db: DatabaseConnection,
}

impl AttachmentRecordRepository {
    /// Create a new attachment-record repository.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The owner's attachment list in position order.
    pub async fn list(
        &self,
        kind: EntityKind,
        entity_id: i32,
    ) -> AppResult<Vec<attachments::Model>> {
        attachments::Entity::find()
            .filter(attachments::Column::EntityKind.eq(kind))
            .filter(attachments::Column::EntityId.eq(entity_id))
            .order_by_asc(attachments::Column::Position)
            .all(&self.db)
            .await
            .map_err(db_err)
    }

    /// The owner's primary attachment record, if one is marked.
    pub async fn primary(
        &self,
        kind: EntityKind,
        entity_id: i32,
    ) -> AppResult<Option<attachments::Model>> {
        attachments::Entity::find()
            .filter(attachments::Column::EntityKind.eq(kind))
            .filter(attachments::Column::EntityId.eq(entity_id))
            .filter(attachments::Column::IsPrimary.eq(true))
            .one(&self.db)
            .await
            .map_err(db_err)
    }

    /// Append `reference` to the owner's list.
    ///
    /// Idempotent: an already-listed reference is returned unchanged
    /// instead of duplicated.
    pub async fn append(
        &self,
        kind: EntityKind,
        entity_id: i32,
        reference: &str,
    ) -> AppResult<attachments::Model> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let model = append_in(&txn, kind, entity_id, reference).await?;
        txn.commit().await.map_err(db_err)?;
        Ok(model)
    }

    /// Remove `reference` from the owner's list. Returns whether a row
    /// was deleted.
    pub async fn remove(
        &self,
        kind: EntityKind,
        entity_id: i32,
        reference: &str,
    ) -> AppResult<bool> {
        let result = attachments::Entity::delete_many()
            .filter(attachments::Column::EntityKind.eq(kind))
            .filter(attachments::Column::EntityId.eq(entity_id))
            .filter(attachments::Column::Reference.eq(reference))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected > 0)
    }

    /// Mark `reference` as the owner's primary attachment.
    ///
    /// Inserts the list row first when absent, then moves the primary
    /// flag and mirrors the reference into the owner's photo/image
    /// column, all in the same transaction.
    pub async fn set_primary(
        &self,
        kind: EntityKind,
        entity_id: i32,
        reference: &str,
    ) -> AppResult<attachments::Model> {
        let txn = self.db.begin().await.map_err(db_err)?;

        let model = append_in(&txn, kind, entity_id, reference).await?;
        attachments::Entity::update_many()
            .col_expr(attachments::Column::IsPrimary, Expr::value(false))
            .filter(attachments::Column::EntityKind.eq(kind))
            .filter(attachments::Column::EntityId.eq(entity_id))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        let mut active: attachments::ActiveModel = model.into();
        active.is_primary = Set(true);
        let model = active.update(&txn).await.map_err(db_err)?;

        mirror_primary(&txn, kind, entity_id, Some(reference)).await?;
        txn.commit().await.map_err(db_err)?;
        Ok(model)
    }

    /// Clear the owner's primary flag and mirrored photo/image column
    /// without touching the list.
    pub async fn clear_primary(&self, kind: EntityKind, entity_id: i32) -> AppResult<()> {
        let txn = self.db.begin().await.map_err(db_err)?;
        attachments::Entity::update_many()
            .col_expr(attachments::Column::IsPrimary, Expr::value(false))
            .filter(attachments::Column::EntityKind.eq(kind))
            .filter(attachments::Column::EntityId.eq(entity_id))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        mirror_primary(&txn, kind, entity_id, None).await?;
        txn.commit().await.map_err(db_err)?;
        Ok(())
    }
}

/// Copy the primary reference into the owner's denormalized photo/image
/// column. A missing owner row is not an error; the list is the source
/// of truth and the column is a read-model convenience.
async fn mirror_primary<C: ConnectionTrait>(
    conn: &C,
    kind: EntityKind,
    entity_id: i32,
    reference: Option<&str>,
) -> AppResult<()> {
    let value = Expr::value(reference.map(str::to_string));
    match kind {
        EntityKind::Member => {
            members::Entity::update_many()
                .col_expr(members::Column::Photo, value)
                .filter(members::Column::Id.eq(entity_id))
                .exec(conn)
                .await
        }
        EntityKind::Item => {
            items::Entity::update_many()
                .col_expr(items::Column::Image, value)
                .filter(items::Column::Id.eq(entity_id))
                .exec(conn)
                .await
        }
        EntityKind::Location => {
            locations::Entity::update_many()
                .col_expr(locations::Column::Image, value)
                .filter(locations::Column::Id.eq(entity_id))
                .exec(conn)
                .await
        }
        EntityKind::Event => {
            events::Entity::update_many()
                .col_expr(events::Column::Image, value)
                .filter(events::Column::Id.eq(entity_id))
                .exec(conn)
                .await
        }
    }
    .map_err(db_err)?;
    Ok(())
}

async fn append_in(
    txn: &DatabaseTransaction,
    kind: EntityKind,
    entity_id: i32,
    reference: &str,
) -> AppResult<attachments::Model> {
    let existing = attachments::Entity::find()
        .filter(attachments::Column::EntityKind.eq(kind))
        .filter(attachments::Column::EntityId.eq(entity_id))
        .filter(attachments::Column::Reference.eq(reference))
        .one(txn)
        .await
        .map_err(db_err)?;
    if let Some(model) = existing {
        return Ok(model);
    }

    let tail = attachments::Entity::find()
        .filter(attachments::Column::EntityKind.eq(kind))
        .filter(attachments::Column::EntityId.eq(entity_id))
        .order_by_desc(attachments::Column::Position)
        .one(txn)
        .await
        .map_err(db_err)?;
    let position = tail.map_or(0, |m| m.position + 1);

    attachments::ActiveModel {
        entity_kind: Set(kind),
        entity_id: Set(entity_id),
        position: Set(position),
        reference: Set(reference.to_string()),
        is_primary: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(db_err)
}

fn db_err(e: sea_orm::DbErr) -> AppError {
    AppError::Database(e.to_string())
}
