//! HTTP API layer with Axum routes.
//!
//! This crate provides:
//! - Upload routes (server-mediated, presigned direct, external intake)
//! - Attachment-record routes per owning entity
//! - The media serving route
//! - Health check

pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use stockroom_db::AttachmentRecordRepository;
use stockroom_media::presign::DirectUploadBroker;
use stockroom_media::resolve::ReadResolver;
use stockroom_media::upload::UploadCoordinator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Attachment-record repository.
    pub records: AttachmentRecordRepository,
    /// Server-mediated upload coordinator.
    pub uploader: Arc<UploadCoordinator>,
    /// Direct upload broker (present only with a remote tier).
    pub broker: Option<Arc<DirectUploadBroker>>,
    /// Reference resolver for serving.
    pub resolver: Arc<ReadResolver>,
    /// Request body limit, matching the upload policy.
    pub max_upload_bytes: u64,
}

/// Creates the main application router.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .merge(routes::media::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use sea_orm_migration::MigratorTrait;
    use stockroom_db::migration::Migrator;
    use stockroom_media::tier::LocalTier;
    use stockroom_media::upload::UploadPolicy;
    use tempfile::TempDir;

    /// Router over a fresh database and a local-only media tier. The
    /// returned guard keeps the backing directory alive.
    pub(crate) async fn test_app() -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}/test.db?mode=rwc", dir.path().display());
        let db = stockroom_db::connect(&url).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let local = Arc::new(LocalTier::new(dir.path().join("media")).unwrap());
        let state = AppState {
            records: AttachmentRecordRepository::new(db),
            uploader: Arc::new(UploadCoordinator::new(
                Arc::clone(&local),
                None,
                UploadPolicy::default(),
            )),
            broker: None,
            resolver: Arc::new(ReadResolver::new(local, None, None)),
            max_upload_bytes: UploadPolicy::default().max_bytes,
        };
        (create_router(state), dir)
    }
}
