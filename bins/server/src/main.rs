//! Stockroom API Server
//!
//! Main entry point for the Stockroom backend service.

use std::sync::Arc;
use std::time::Duration;

use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockroom_api::{AppState, create_router};
use stockroom_db::migration::Migrator;
use stockroom_db::{AttachmentRecordRepository, SqlReferenceSource, SqliteSnapshotSource, connect};
use stockroom_media::backup::{BackupOptions, BackupService};
use stockroom_media::housekeeping::{Housekeeping, HousekeepingOptions};
use stockroom_media::presign::{DirectUploadBroker, DirectUploadConfig};
use stockroom_media::resolve::ReadResolver;
use stockroom_media::sync::SyncPool;
use stockroom_media::tier::{LocalTier, RemoteConfig, RemoteTier};
use stockroom_media::upload::{UploadCoordinator, UploadPolicy};
use stockroom_shared::AppConfig;
use stockroom_shared::config::MediaSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Connect to database and apply migrations
    let db = connect(&config.database.url).await?;
    Migrator::up(&db, None).await?;
    info!("Connected to database");

    // Storage tiers
    let local = Arc::new(LocalTier::new(&config.media.root)?);
    let remote = match remote_config(&config.media) {
        Some(remote_config) => {
            let tier = Arc::new(RemoteTier::from_config(remote_config)?);
            info!(prefix = %config.media.remote.prefix, "Remote tier registered");
            Some(tier)
        }
        None => {
            info!("Remote tier not configured, running local-only");
            None
        }
    };

    // Lazy-sync worker pool backfills the local cache after remote reads
    let sync = remote.as_ref().map(|tier| {
        SyncPool::start(
            Arc::clone(&local),
            Arc::clone(tier),
            config.housekeeping.sync_queue_capacity,
            config.housekeeping.sync_workers,
        )
    });

    let policy = UploadPolicy::new(config.media.max_upload_bytes);
    let uploader = Arc::new(UploadCoordinator::new(
        Arc::clone(&local),
        remote.clone(),
        policy.clone(),
    ));
    let broker = remote.as_ref().map(|tier| {
        Arc::new(DirectUploadBroker::new(
            Arc::clone(tier),
            policy.clone(),
            DirectUploadConfig {
                enabled: config.media.direct_upload.enabled,
                validate_cors: config.media.direct_upload.validate_cors,
                probe_origin: config.media.direct_upload.probe_origin.clone(),
            },
            config.media.presign_upload_ttl_secs,
        ))
    });
    let resolver = Arc::new(ReadResolver::new(
        Arc::clone(&local),
        remote.clone(),
        sync.clone(),
    ));

    // Background housekeeping: warm-sync and garbage collection
    let housekeeping = Arc::new(Housekeeping::new(
        Arc::clone(&local),
        remote.clone(),
        Arc::new(SqlReferenceSource::new(db.clone())),
        HousekeepingOptions {
            sync_on_start: config.housekeeping.sync_on_start,
            cleanup_on_start: config.housekeeping.cleanup_on_start,
            grace: Duration::from_secs(config.housekeeping.grace_secs),
            sync_page_size: config.housekeeping.sync_page_size,
            gc_interval: config.housekeeping.gc_interval_secs.map(Duration::from_secs),
            sync_interval: config
                .housekeeping
                .sync_interval_secs
                .map(Duration::from_secs),
        },
    ));
    housekeeping.spawn();

    // Database backups ride on the remote tier
    let backup = Arc::new(BackupService::new(
        remote.clone(),
        Arc::new(SqliteSnapshotSource::new(db.clone())),
        BackupOptions {
            prefix: config.backup.prefix.clone(),
            retention: (config.backup.retention_days > 0)
                .then(|| Duration::from_secs(config.backup.retention_days * 86400)),
        },
    ));
    backup.spawn(
        config.backup.on_start,
        config.backup.interval_secs.map(Duration::from_secs),
    );

    // Create application state
    let state = AppState {
        records: AttachmentRecordRepository::new(db),
        uploader,
        broker,
        resolver,
        max_upload_bytes: config.media.max_upload_bytes,
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Remote tier configuration, present only when endpoint, bucket and
/// both credentials are all set.
fn remote_config(media: &MediaSettings) -> Option<RemoteConfig> {
    let remote = &media.remote;
    let (Some(endpoint), Some(bucket), Some(access_key_id), Some(secret_access_key)) = (
        remote.endpoint.as_ref(),
        remote.bucket.as_ref(),
        remote.access_key_id.as_ref(),
        remote.secret_access_key.as_ref(),
    ) else {
        return None;
    };

    let mut config = RemoteConfig::new(
        endpoint,
        bucket,
        access_key_id,
        secret_access_key,
        &remote.region,
    )
    .with_prefix(&remote.prefix)
    .with_public_read(remote.public_read);
    if let Some(base) = &remote.public_base_url {
        config = config.with_public_base_url(base);
    }
    config.presign_upload_ttl_secs = media.presign_upload_ttl_secs;
    config.presign_download_ttl_secs = media.presign_download_ttl_secs;
    Some(config)
}
