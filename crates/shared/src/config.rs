//! Application configuration management.
//!
//! Configuration is layered: `config/default.toml`, then
//! `config/{RUN_MODE}.toml`, then `STOCKROOM__`-prefixed environment
//! variables, each layer overriding the previous one.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Media storage configuration.
    #[serde(default)]
    pub media: MediaSettings,
    /// Housekeeping configuration.
    #[serde(default)]
    pub housekeeping: HousekeepingSettings,
    /// Database backup configuration.
    #[serde(default)]
    pub backup: BackupSettings,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL (e.g. `sqlite://stockroom.db?mode=rwc`).
    pub url: String,
}

/// Media storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaSettings {
    /// Root directory of the local tier.
    #[serde(default = "default_media_root")]
    pub root: String,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Presigned upload URL TTL in seconds.
    #[serde(default = "default_upload_ttl")]
    pub presign_upload_ttl_secs: u64,
    /// Presigned download URL TTL in seconds.
    #[serde(default = "default_download_ttl")]
    pub presign_download_ttl_secs: u64,
    /// Remote tier settings. The remote tier is registered only when
    /// endpoint, bucket and both credentials are all present.
    #[serde(default)]
    pub remote: RemoteSettings,
    /// Direct (client-to-remote) upload settings.
    #[serde(default)]
    pub direct_upload: DirectUploadSettings,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            root: default_media_root(),
            max_upload_bytes: default_max_upload_bytes(),
            presign_upload_ttl_secs: default_upload_ttl(),
            presign_download_ttl_secs: default_download_ttl(),
            remote: RemoteSettings::default(),
            direct_upload: DirectUploadSettings::default(),
        }
    }
}

fn default_media_root() -> String {
    "./media".to_string()
}

fn default_max_upload_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_upload_ttl() -> u64 {
    900 // 15 minutes
}

fn default_download_ttl() -> u64 {
    3600 // 1 hour
}

/// Remote object-store settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteSettings {
    /// S3-compatible endpoint URL.
    pub endpoint: Option<String>,
    /// Bucket name.
    pub bucket: Option<String>,
    /// Access key ID.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
    /// Region (defaults to `auto` for R2-style providers).
    #[serde(default = "default_region")]
    pub region: String,
    /// Key namespace prefix for managed media objects.
    #[serde(default = "default_remote_prefix")]
    pub prefix: String,
    /// Public-facing base URL (e.g. CDN domain) substituted into signed
    /// URLs in place of the credentials endpoint.
    pub public_base_url: Option<String>,
    /// Whether objects in the bucket are publicly readable.
    #[serde(default)]
    pub public_read: bool,
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_remote_prefix() -> String {
    "media".to_string()
}

impl RemoteSettings {
    /// Whether enough of the remote tier is configured to register it.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.endpoint.is_some()
            && self.bucket.is_some()
            && self.access_key_id.is_some()
            && self.secret_access_key.is_some()
    }
}

/// Direct upload (presign) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectUploadSettings {
    /// Whether direct client-to-remote uploads are enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Whether to validate bucket CORS rules before enabling the feature.
    #[serde(default = "default_true")]
    pub validate_cors: bool,
    /// Origin sent with the CORS capability probe.
    #[serde(default = "default_probe_origin")]
    pub probe_origin: String,
}

impl Default for DirectUploadSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            validate_cors: true,
            probe_origin: default_probe_origin(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_probe_origin() -> String {
    "http://localhost".to_string()
}

/// Housekeeping settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HousekeepingSettings {
    /// Warm-sync the local tier from the remote tier on startup.
    #[serde(default)]
    pub sync_on_start: bool,
    /// Run one garbage-collection pass on startup.
    #[serde(default)]
    pub cleanup_on_start: bool,
    /// Minimum age in seconds an orphaned object must reach before it may
    /// be deleted.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Page size used when listing the remote tier during warm-sync.
    #[serde(default = "default_sync_page_size")]
    pub sync_page_size: usize,
    /// Re-run garbage collection every N seconds (disabled when unset).
    pub gc_interval_secs: Option<u64>,
    /// Re-run warm-sync every N seconds (disabled when unset).
    pub sync_interval_secs: Option<u64>,
    /// Capacity of the lazy-sync job queue.
    #[serde(default = "default_sync_queue_capacity")]
    pub sync_queue_capacity: usize,
    /// Number of lazy-sync worker tasks.
    #[serde(default = "default_sync_workers")]
    pub sync_workers: usize,
}

impl Default for HousekeepingSettings {
    fn default() -> Self {
        Self {
            sync_on_start: false,
            cleanup_on_start: false,
            grace_secs: default_grace_secs(),
            sync_page_size: default_sync_page_size(),
            gc_interval_secs: None,
            sync_interval_secs: None,
            sync_queue_capacity: default_sync_queue_capacity(),
            sync_workers: default_sync_workers(),
        }
    }
}

fn default_grace_secs() -> u64 {
    86400 // 1 day
}

fn default_sync_page_size() -> usize {
    1000
}

fn default_sync_queue_capacity() -> usize {
    256
}

fn default_sync_workers() -> usize {
    2
}

/// Database backup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupSettings {
    /// Run one backup on startup.
    #[serde(default)]
    pub on_start: bool,
    /// Re-run backups every N seconds (disabled when unset).
    pub interval_secs: Option<u64>,
    /// Maximum age in days a backup may reach before pruning
    /// (pruning disabled when unset or zero).
    #[serde(default)]
    pub retention_days: u64,
    /// Remote key prefix for backup snapshots.
    #[serde(default = "default_backup_prefix")]
    pub prefix: String,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            on_start: false,
            interval_secs: None,
            retention_days: 0,
            prefix: default_backup_prefix(),
        }
    }
}

fn default_backup_prefix() -> String {
    "backups".to_string()
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("STOCKROOM").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AppConfig {
        let cfg = config::Config::builder()
            .set_override("database.url", "sqlite::memory:")
            .unwrap()
            .set_override("server.port", 3000)
            .unwrap()
            .build()
            .unwrap();
        cfg.try_deserialize().unwrap()
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let cfg = minimal();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.media.root, "./media");
        assert_eq!(cfg.media.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.media.remote.prefix, "media");
        assert!(!cfg.media.remote.is_complete());
        assert_eq!(cfg.housekeeping.grace_secs, 86400);
        assert_eq!(cfg.backup.retention_days, 0);
        assert_eq!(cfg.backup.prefix, "backups");
    }

    #[test]
    fn remote_requires_all_credentials() {
        let mut remote = RemoteSettings {
            endpoint: Some("https://s3.example.com".into()),
            bucket: Some("stockroom".into()),
            access_key_id: Some("key".into()),
            secret_access_key: None,
            ..RemoteSettings::default()
        };
        assert!(!remote.is_complete());
        remote.secret_access_key = Some("secret".into());
        assert!(remote.is_complete());
    }

    #[test]
    fn direct_upload_defaults_to_cors_validation() {
        let settings = DirectUploadSettings::default();
        assert!(!settings.enabled);
        assert!(settings.validate_cors);
    }
}
