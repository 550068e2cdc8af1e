//! API route definitions.

pub mod attachments;
pub mod health;
pub mod media;

use axum::Router;

use crate::AppState;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(attachments::routes())
}
