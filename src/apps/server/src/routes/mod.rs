//! HTTP routes

pub mod admin;
pub mod chat;
pub mod images;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Uniform error payload for non-stream failures.
pub fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": {
                "message": message.into(),
                "type": "gateway_error",
            }
        })),
    )
        .into_response()
}
