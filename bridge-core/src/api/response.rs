//! Common JSON response envelope for HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{json, Value};

/// Wraps `data` in a `{ "success": true, "data": ... }` envelope.
pub fn api_success(data: impl Serialize) -> impl IntoResponse {
    Json(json!({ "success": true, "data": data }))
}

/// A bodyless success response, for handlers that only confirm an action.
pub fn api_ok() -> impl IntoResponse {
    Json(json!({ "success": true }))
}

/// Wraps an error in a `{ "success": false, "error": { "code", "message" } }`
/// envelope with the given status code.
pub fn api_error(status: StatusCode, code: &str, message: impl ToString) -> Response {
    let body: Value = json!({
        "success": false,
        "error": { "code": code, "message": message.to_string() },
    });
    (status, Json(body)).into_response()
}
