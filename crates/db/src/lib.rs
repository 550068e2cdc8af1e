//! Database layer with `SeaORM` entities and repositories.
//!
//! This crate provides:
//! - `SeaORM` entity definitions for members, items, locations, events
//!   and their attachment records
//! - Repository abstractions for attachment-record access
//! - The live-reference scan backing media garbage collection
//! - The `VACUUM INTO` snapshot source backing database backups
//! - Database migrations

pub mod entities;
pub mod migration;
pub mod repositories;

pub use repositories::{AttachmentRecordRepository, SqlReferenceSource, SqliteSnapshotSource};

use sea_orm::{Database, DatabaseConnection, DbErr};

/// Establishes a connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}
