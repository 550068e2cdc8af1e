//! `SeaORM` entity definitions.

pub mod attachments;
pub mod events;
pub mod items;
pub mod locations;
pub mod members;
