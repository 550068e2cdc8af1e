//! Direct client-to-remote upload brokering.
//!
//! The broker issues presigned PUT URLs so clients can upload straight
//! to the remote store without routing bytes through the app server.
//! The feature is gated by a one-time CORS capability probe: if the
//! bucket cannot be confirmed to accept cross-origin `PUT`, direct
//! upload stays disabled for the process lifetime and callers fall back
//! to the server-mediated path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::MediaError;
use crate::reference::ObjectKey;
use crate::tier::RemoteTier;
use crate::upload::{StoredNameGenerator, UploadPolicy};

/// Probe attempts before giving up on a transient error.
const PROBE_MAX_ATTEMPTS: u32 = 3;
/// Base backoff between probe attempts.
const PROBE_BACKOFF: Duration = Duration::from_millis(500);

/// Direct upload configuration.
#[derive(Debug, Clone)]
pub struct DirectUploadConfig {
    /// Whether the feature is enabled at all.
    pub enabled: bool,
    /// Whether to confirm bucket CORS rules before first use.
    pub validate_cors: bool,
    /// Origin sent with the capability probe.
    pub probe_origin: String,
}

impl Default for DirectUploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            validate_cors: true,
            probe_origin: "http://localhost".to_string(),
        }
    }
}

/// Everything a client needs to perform the upload itself.
#[derive(Debug, Clone)]
pub struct PresignGrant {
    /// Object key the entity layer persists after the client confirms.
    pub object_key: ObjectKey,
    /// URL to PUT the bytes against.
    pub upload_url: String,
    /// HTTP method (PUT).
    pub method: String,
    /// Headers the client must send.
    pub required_headers: HashMap<String, String>,
    /// Seconds until the URL expires.
    pub expires_in_secs: u64,
    /// Maximum accepted size in bytes.
    pub max_size: u64,
}

/// Issues presigned PUT URLs for client-to-remote uploads.
pub struct DirectUploadBroker {
    remote: Arc<RemoteTier>,
    policy: UploadPolicy,
    config: DirectUploadConfig,
    names: StoredNameGenerator,
    http: reqwest::Client,
    ttl_secs: u64,
    // Resolved once per process; false is permanent.
    capability: OnceCell<bool>,
}

impl DirectUploadBroker {
    /// Create a broker.
    #[must_use]
    pub fn new(
        remote: Arc<RemoteTier>,
        policy: UploadPolicy,
        config: DirectUploadConfig,
        ttl_secs: u64,
    ) -> Self {
        Self {
            remote,
            policy,
            config,
            names: StoredNameGenerator::new(),
            http: reqwest::Client::new(),
            ttl_secs,
            capability: OnceCell::new(),
        }
    }

    /// Whether direct upload is usable, resolving the CORS capability
    /// probe on first call.
    pub async fn enabled(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        if !self.config.validate_cors {
            return true;
        }
        *self
            .capability
            .get_or_init(|| async { self.probe_cors().await })
            .await
    }

    /// Issue a presigned PUT grant.
    ///
    /// Guardrails (extension allow-list, declared size) are checked
    /// before any network call.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType`/`TooLarge` on validation failure,
    /// `Configuration` when the feature is disabled, or a remote error
    /// when signing fails.
    pub async fn presign(
        &self,
        filename: &str,
        content_type: &str,
        declared_size: u64,
    ) -> Result<PresignGrant, MediaError> {
        self.policy.validate(filename, declared_size)?;

        if !self.enabled().await {
            return Err(MediaError::configuration("direct upload is disabled"));
        }

        let stored_name = self.names.generate(filename);
        let bare = ObjectKey::parse(&stored_name)
            .map_err(|e| MediaError::operation(format!("generated name: {e}")))?;
        let key = self.remote.managed_key(&bare);

        let presigned = self.remote.presign_put(&key, content_type).await?;
        info!(key = %key, content_type, "issued direct upload grant");

        Ok(PresignGrant {
            object_key: key,
            upload_url: presigned.url,
            method: presigned.method,
            required_headers: presigned.headers,
            expires_in_secs: self.ttl_secs,
            max_size: self.policy.max_bytes,
        })
    }

    /// One-time capability probe: a CORS preflight against the bucket
    /// asking for cross-origin PUT. Transient errors are retried a
    /// bounded number of times; anything unconfirmed fails open to
    /// "feature disabled".
    async fn probe_cors(&self) -> bool {
        let url = format!(
            "{}/{}",
            self.remote.endpoint().trim_end_matches('/'),
            self.remote.bucket()
        );

        for attempt in 1..=PROBE_MAX_ATTEMPTS {
            let response = self
                .http
                .request(reqwest::Method::OPTIONS, &url)
                .header("Origin", &self.config.probe_origin)
                .header("Access-Control-Request-Method", "PUT")
                .timeout(Duration::from_secs(10))
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let allowed = allows_put(resp.headers());
                    if allowed {
                        info!(url, "CORS probe confirmed cross-origin PUT, direct upload enabled");
                    } else {
                        warn!(
                            url,
                            status = %resp.status(),
                            "CORS probe found no rule permitting PUT, direct upload disabled"
                        );
                    }
                    return allowed;
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "CORS probe request failed");
                    if attempt < PROBE_MAX_ATTEMPTS {
                        tokio::time::sleep(PROBE_BACKOFF * attempt).await;
                    }
                }
            }
        }

        warn!(url, "CORS probe exhausted retries, direct upload disabled");
        false
    }
}

/// Whether a preflight response permits PUT from at least one origin.
fn allows_put(headers: &reqwest::header::HeaderMap) -> bool {
    let origin_allowed = headers.contains_key("access-control-allow-origin");
    let methods = headers
        .get("access-control-allow-methods")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    origin_allowed
        && (methods.split(',').any(|m| m.trim().eq_ignore_ascii_case("PUT")) || methods == "*")
}
