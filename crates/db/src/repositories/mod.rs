//! Repository abstractions for data access.
//!
//! Repositories provide a clean interface for database operations,
//! hiding the `SeaORM` implementation details from the rest of the
//! application.

pub mod attachment;
pub mod references;
pub mod snapshot;

pub use attachment::AttachmentRecordRepository;
pub use references::SqlReferenceSource;
pub use snapshot::SqliteSnapshotSource;
