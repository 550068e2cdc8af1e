//! Health check endpoints.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Media storage status.
    pub media: MediaStatus,
}

/// Storage-tier status included in the health report.
#[derive(Serialize)]
pub struct MediaStatus {
    /// Root directory of the local tier.
    pub local_root: String,
    /// Whether the local root exists on disk.
    pub local_tier: &'static str,
    /// Whether a remote tier is registered.
    pub remote_tier: bool,
    /// Whether direct client-to-remote upload is configured.
    pub direct_upload: bool,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let root = state.uploader.local_root();
    let local_ok = root.is_dir();
    Json(HealthResponse {
        status: if local_ok { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        media: MediaStatus {
            local_root: root.display().to_string(),
            local_tier: if local_ok { "ok" } else { "missing" },
            remote_tier: state.uploader.has_remote(),
            direct_upload: state.broker.is_some(),
        },
    })
}

/// Creates health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use crate::testing::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_storage_tiers() {
        let (app, _dir) = test_app().await;
        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["media"]["local_tier"], "ok");
        assert_eq!(body["media"]["remote_tier"], false);
        assert_eq!(body["media"]["direct_upload"], false);
    }
}
