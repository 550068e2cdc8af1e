//! Media serving route.
//!
//! Local hits stream the file straight off disk; remote-only objects
//! redirect the client to a signed or public URL while the local cache
//! warms in the background. Unsafe or unknown references are a plain
//! 404 and never reveal the storage root.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect},
    routing::get,
};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::AppState;
use stockroom_media::resolve::Resolved;

/// Creates the media serving routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/media/{*reference}", get(serve))
}

/// GET `/media/{*reference}`
async fn serve(State(state): State<AppState>, Path(reference): Path<String>) -> impl IntoResponse {
    match state.resolver.resolve(&reference).await {
        Resolved::File(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let stream = ReaderStream::new(file);
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, content_type_for(&reference))],
                    Body::from_stream(stream),
                )
                    .into_response()
            }
            Err(e) => {
                // Deleted between resolution and open.
                warn!(reference, error = %e, "resolved file vanished");
                not_found()
            }
        },
        Resolved::Url(url) => Redirect::temporary(&url).into_response(),
        Resolved::NotFound => not_found(),
    }
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "message": "Attachment not found"
        })),
    )
        .into_response()
}

/// Content type from the reference's extension.
fn content_type_for(reference: &str) -> &'static str {
    let ext = std::path::Path::new(reference)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("svg") => "image/svg+xml",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_app;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn serves_local_file_with_content_type() {
        let (app, dir) = test_app().await;
        tokio::fs::write(dir.path().join("media/photo.png"), b"png bytes")
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::get("/media/photo.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "image/png"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"png bytes");
    }

    #[tokio::test]
    async fn missing_reference_is_404() {
        let (app, _guard) = test_app().await;

        let response = app
            .oneshot(
                Request::get("/media/nope.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_reference_is_404() {
        let (app, _guard) = test_app().await;

        let response = app
            .oneshot(
                Request::get("/media/..%2f..%2fetc%2fpasswd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[rstest::rstest]
    #[case("a.JPG", "image/jpeg")]
    #[case("poster.png", "image/png")]
    #[case("clip.webm", "video/webm")]
    #[case("talk.mp3", "audio/mpeg")]
    #[case("noext", "application/octet-stream")]
    fn content_types_cover_the_allow_list(#[case] reference: &str, #[case] expected: &str) {
        assert_eq!(content_type_for(reference), expected);
    }
}
