//! Upload and attachment-record routes.
//!
//! Three intake paths produce a reference string the entity layer can
//! persist: server-mediated multipart upload, a presigned direct-upload
//! grant, and external URL intake. Attachment-record routes maintain
//! the per-entity ordered lists behind those references.

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::AppState;
use stockroom_db::entities::attachments::EntityKind;
use stockroom_media::error::MediaError;
use stockroom_media::reference::AttachmentRef;
use stockroom_shared::error::AppError;

/// Creates the upload and attachment-record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/attachments", post(upload))
        .route("/attachments/presign", post(presign))
        .route("/attachments/external", post(external))
        .route("/entities/{kind}/{id}/attachments", get(list_records))
        .route("/entities/{kind}/{id}/attachments", post(append_record))
        .route("/entities/{kind}/{id}/attachments", delete(remove_record))
        .route(
            "/entities/{kind}/{id}/attachments/primary",
            put(set_primary).delete(unset_primary),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response carrying a persistable reference string.
#[derive(Debug, Serialize)]
pub struct ReferenceResponse {
    /// Reference to store on the owning entity.
    pub reference: String,
}

/// Request body for a presigned direct-upload grant.
#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    /// Original filename.
    pub filename: String,
    /// MIME type the client will send.
    pub content_type: String,
    /// Declared size in bytes.
    pub size: u64,
}

/// Response for a presigned direct-upload grant.
#[derive(Debug, Serialize)]
pub struct PresignResponse {
    /// Reference to persist once the client confirms the upload.
    pub reference: String,
    /// URL to PUT the bytes against.
    pub upload_url: String,
    /// HTTP method to use.
    pub method: String,
    /// Headers the client must send.
    pub required_headers: std::collections::HashMap<String, String>,
    /// Seconds until the URL expires.
    pub expires_in_secs: u64,
    /// Maximum accepted size in bytes.
    pub max_size: u64,
}

/// Request body for external URL intake.
#[derive(Debug, Deserialize)]
pub struct ExternalRequest {
    /// Absolute or scheme-relative URL.
    pub url: String,
}

/// Request body naming a reference on an entity's list.
#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    /// Reference string.
    pub reference: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_kind(kind: &str) -> Result<EntityKind, axum::response::Response> {
    match kind {
        "member" => Ok(EntityKind::Member),
        "item" => Ok(EntityKind::Item),
        "location" => Ok(EntityKind::Location),
        "event" => Ok(EntityKind::Event),
        _ => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "unknown_entity_kind",
                "message": format!("Unknown entity kind: {kind}")
            })),
        )
            .into_response()),
    }
}

fn media_error_response(e: &MediaError) -> axum::response::Response {
    match e {
        MediaError::UnsupportedType { .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "unsupported_type",
                "message": e.to_string()
            })),
        )
            .into_response(),
        MediaError::TooLarge { .. } => (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({
                "error": "file_too_large",
                "message": e.to_string()
            })),
        )
            .into_response(),
        MediaError::Configuration(_) | MediaError::RemoteUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "storage_unavailable",
                "message": "Storage is not available for this operation"
            })),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "internal_error",
                "message": "An error occurred"
            })),
        )
            .into_response(),
    }
}

fn db_error_response(e: &AppError) -> axum::response::Response {
    error!(error = %e, "attachment record operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": e.error_code().to_lowercase(),
            "message": "An error occurred"
        })),
    )
        .into_response()
}

// ============================================================================
// Route Handlers
// ============================================================================

/// POST `/attachments`
/// Server-mediated multipart upload. Returns the reference to persist.
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => break field,
            Ok(Some(_)) => {}
            Ok(None) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "missing_file",
                        "message": "Multipart field 'file' is required"
                    })),
                )
                    .into_response();
            }
            Err(e) => {
                warn!(error = %e, "malformed multipart upload");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "malformed_multipart",
                        "message": "Could not read multipart body"
                    })),
                )
                    .into_response();
            }
        }
    };

    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = match field.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!(error = %e, "failed reading upload body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "malformed_multipart",
                    "message": "Could not read upload bytes"
                })),
            )
                .into_response();
        }
    };

    match state.uploader.store(bytes, &filename, &content_type).await {
        Ok(reference) => {
            info!(reference = %reference, "upload stored");
            (
                StatusCode::CREATED,
                Json(ReferenceResponse {
                    reference: reference.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, filename, "upload rejected");
            media_error_response(&e)
        }
    }
}

/// POST `/attachments/presign`
/// Issue a presigned direct-upload grant.
async fn presign(
    State(state): State<AppState>,
    Json(payload): Json<PresignRequest>,
) -> impl IntoResponse {
    let Some(broker) = &state.broker else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "storage_not_configured",
                "message": "Remote storage is not configured"
            })),
        )
            .into_response();
    };

    match broker
        .presign(&payload.filename, &payload.content_type, payload.size)
        .await
    {
        Ok(grant) => (
            StatusCode::OK,
            Json(PresignResponse {
                reference: grant.object_key.to_string(),
                upload_url: grant.upload_url,
                method: grant.method,
                required_headers: grant.required_headers,
                expires_in_secs: grant.expires_in_secs,
                max_size: grant.max_size,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, filename = payload.filename, "presign rejected");
            media_error_response(&e)
        }
    }
}

/// POST `/attachments/external`
/// Accept an external URL and return its normalized reference.
async fn external(Json(payload): Json<ExternalRequest>) -> impl IntoResponse {
    match AttachmentRef::parse(&payload.url) {
        Ok(reference @ AttachmentRef::External(_)) => (
            StatusCode::OK,
            Json(ReferenceResponse {
                reference: reference.to_string(),
            }),
        )
            .into_response(),
        Ok(AttachmentRef::Stored(_)) | Err(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "not_an_external_url",
                "message": "Expected an absolute http(s) or scheme-relative URL"
            })),
        )
            .into_response(),
    }
}

/// GET `/entities/{kind}/{id}/attachments`
/// The entity's attachment list in order.
async fn list_records(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    match state.records.list(kind, id).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => db_error_response(&e),
    }
}

/// POST `/entities/{kind}/{id}/attachments`
/// Append a reference to the entity's list.
async fn append_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
    Json(payload): Json<RecordRequest>,
) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    if AttachmentRef::parse(&payload.reference).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_reference",
                "message": "Reference is empty or path-unsafe"
            })),
        )
            .into_response();
    }
    match state.records.append(kind, id, &payload.reference).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => db_error_response(&e),
    }
}

/// DELETE `/entities/{kind}/{id}/attachments`
/// Remove a reference from the entity's list.
async fn remove_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
    Json(payload): Json<RecordRequest>,
) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    match state.records.remove(kind, id, &payload.reference).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "not_found",
                "message": "Reference is not on this entity's list"
            })),
        )
            .into_response(),
        Err(e) => db_error_response(&e),
    }
}

/// PUT `/entities/{kind}/{id}/attachments/primary`
/// Mark a reference as the entity's primary attachment, inserting the
/// list row first when absent.
async fn set_primary(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
    Json(payload): Json<RecordRequest>,
) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    if AttachmentRef::parse(&payload.reference).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_reference",
                "message": "Reference is empty or path-unsafe"
            })),
        )
            .into_response();
    }
    match state.records.set_primary(kind, id, &payload.reference).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => db_error_response(&e),
    }
}

/// DELETE `/entities/{kind}/{id}/attachments/primary`
/// Clear the entity's primary mark. The list itself is untouched.
async fn unset_primary(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
) -> impl IntoResponse {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    match state.records.clear_primary(kind, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn multipart_body(filename: &str, bytes: &[u8]) -> (String, Vec<u8>) {
        let boundary = "XUPLOADBOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    #[tokio::test]
    async fn upload_returns_reference() {
        let (app, _guard) = test_app().await;
        let (content_type, body) = multipart_body("photo.jpg", b"jpeg bytes");

        let response = app
            .oneshot(
                Request::post("/api/v1/attachments")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json: Value = serde_json::from_slice(
            &response.into_body().collect().await.unwrap().to_bytes(),
        )
        .unwrap();
        let reference = json["reference"].as_str().unwrap();
        assert!(reference.starts_with("photo_"));
        assert!(reference.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn upload_rejects_disallowed_extension() {
        let (app, _guard) = test_app().await;
        let (content_type, body) = multipart_body("script.exe", b"MZ");

        let response = app
            .oneshot(
                Request::post("/api/v1/attachments")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn presign_without_remote_is_unavailable() {
        let (app, _guard) = test_app().await;

        let response = app
            .oneshot(
                Request::post("/api/v1/attachments/presign")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"filename":"a.jpg","content_type":"image/jpeg","size":100}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn external_intake_normalizes_scheme_relative() {
        let (app, _guard) = test_app().await;

        let response = app
            .oneshot(
                Request::post("/api/v1/attachments/external")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url":"//cdn.example.com/a.png"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(
            &response.into_body().collect().await.unwrap().to_bytes(),
        )
        .unwrap();
        assert_eq!(json["reference"], "//cdn.example.com/a.png");
    }

    #[tokio::test]
    async fn set_primary_inserts_and_lists() {
        let (app, _guard) = test_app().await;

        let response = app
            .clone()
            .oneshot(
                Request::put("/api/v1/entities/item/5/attachments/primary")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"reference":"media/tool.jpg"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/api/v1/entities/item/5/attachments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(
            &response.into_body().collect().await.unwrap().to_bytes(),
        )
        .unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["reference"], "media/tool.jpg");
        assert_eq!(json[0]["is_primary"], true);
    }

    #[tokio::test]
    async fn unset_primary_clears_the_flag_but_keeps_the_list() {
        let (app, _guard) = test_app().await;

        let response = app
            .clone()
            .oneshot(
                Request::put("/api/v1/entities/event/9/attachments/primary")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"reference":"media/poster.png"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::delete("/api/v1/entities/event/9/attachments/primary")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::get("/api/v1/entities/event/9/attachments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(
            &response.into_body().collect().await.unwrap().to_bytes(),
        )
        .unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["is_primary"], false);
    }

    #[tokio::test]
    async fn unknown_entity_kind_is_rejected() {
        let (app, _guard) = test_app().await;

        let response = app
            .oneshot(
                Request::get("/api/v1/entities/widget/1/attachments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
