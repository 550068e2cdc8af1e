//! Initial schema.
//!
//! Creates the entity tables and the shared attachment-record table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(INITIAL_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS attachments;
             DROP TABLE IF EXISTS events;
             DROP TABLE IF EXISTS items;
             DROP TABLE IF EXISTS locations;
             DROP TABLE IF EXISTS members;",
        )
        .await?;
        Ok(())
    }
}

const INITIAL_SQL: &str = r"
CREATE TABLE members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    contact TEXT,
    photo TEXT,
    notes TEXT,
    last_modified TEXT NOT NULL
);

CREATE TABLE locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    responsible_id INTEGER REFERENCES members(id),
    image TEXT,
    notes TEXT,
    last_modified TEXT NOT NULL
);

CREATE TABLE items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category TEXT,
    status TEXT,
    responsible_id INTEGER REFERENCES members(id),
    location_id INTEGER REFERENCES locations(id),
    image TEXT,
    notes TEXT,
    purchase_link TEXT,
    last_modified TEXT NOT NULL
);

CREATE TABLE events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    organizer_id INTEGER REFERENCES members(id),
    location_id INTEGER REFERENCES locations(id),
    starts_at TEXT,
    image TEXT,
    notes TEXT,
    last_modified TEXT NOT NULL
);

-- One table for every entity kind's ordered attachment list
CREATE TABLE attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_kind TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    reference TEXT NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Index for list retrieval in order
CREATE INDEX idx_attachments_entity ON attachments(entity_kind, entity_id, position);

-- One row per reference per owner
CREATE UNIQUE INDEX idx_attachments_entity_ref ON attachments(entity_kind, entity_id, reference);

-- Index for the garbage-collection reference scan
CREATE INDEX idx_attachments_reference ON attachments(reference);
";
