//! `SeaORM` Entity for attachment records.
//!
//! One table holds the ordered attachment lists of every entity kind.
//! The owning entity is addressed by `(entity_kind, entity_id)` and the
//! primary flag marks at most one row per owner.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of entity an attachment record belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum EntityKind {
    /// Member profile photo list.
    #[sea_orm(string_value = "member")]
    Member,
    /// Item attachment list.
    #[sea_orm(string_value = "item")]
    Item,
    /// Location attachment list.
    #[sea_orm(string_value = "location")]
    Location,
    /// Event attachment list.
    #[sea_orm(string_value = "event")]
    Event,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "attachments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub entity_kind: EntityKind,
    pub entity_id: i32,
    /// Position within the owner's ordered list.
    pub position: i32,
    /// Raw attachment reference string (stored key or external URL).
    pub reference: String,
    pub is_primary: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
