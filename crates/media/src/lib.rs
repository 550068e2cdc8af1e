//! Attachment storage and housekeeping subsystem for Stockroom.
//!
//! This crate reconciles two storage tiers behind one reference type:
//! a filesystem-backed local tier and an optional S3-compatible remote
//! tier. It owns every photo/video/audio attachment referenced by the
//! entity layer, plus the periodic database-backup stream that rides on
//! the same remote store.
//!
//! # Modules
//!
//! - `reference` - tagged attachment references and path-safe keys
//! - `tier` - local and remote storage tiers
//! - `upload` - server-mediated uploads with remote-to-local fallback
//! - `presign` - direct client-to-remote uploads behind a CORS probe
//! - `resolve` - reference-to-URL/file resolution with lazy cache fill
//! - `sync` - bounded background worker pool for cache backfill
//! - `reach` - live-reference collection over the entity layer
//! - `gc` - grace-windowed garbage collection across both tiers
//! - `housekeeping` - startup/periodic sync and cleanup orchestration
//! - `backup` - consistent database snapshots with retention pruning

pub mod backup;
pub mod error;
pub mod gc;
pub mod housekeeping;
pub mod presign;
pub mod reach;
pub mod reference;
pub mod resolve;
pub mod sync;
pub mod tier;
pub mod upload;

pub use error::MediaError;
pub use reference::{AttachmentRef, ObjectKey, RefParseError};
pub use tier::{LocalTier, PresignedUrl, RemoteConfig, RemoteTier, StoredObject};
