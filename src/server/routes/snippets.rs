use crate::core::GenerateRequest;
use crate::server::state::AppState;
use crate::snippets::snippets;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

/// `POST /api/snippets` takes a generate body and returns code reproducing it.
async fn handler(
    State(state): State<AppState>,
    request: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    match request {
        Ok(Json(request)) => {
            let snippets = snippets(&request, &state.config.inference.hub_base_url);
            Json(json!({ "snippets": snippets })).into_response()
        }
        Err(rejection) => (
            rejection.status(),
            Json(json!({ "error": rejection.body_text() })),
        )
            .into_response(),
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/snippets", post(handler))
        .with_state(state)
}
