//! HTTP surface of the relay.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;

use crate::core::LLMError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// `{error}` body with 401 for authentication failures and 500 otherwise.
pub fn error_response(err: &LLMError) -> Response {
    let status = if err.is_authentication() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
