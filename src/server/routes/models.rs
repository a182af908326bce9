use crate::catalog::PipelineTag;
use crate::server::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

/// `GET /api/models?pipeline_tag=...`; the parameter may repeat.
async fn handler(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let tags: Result<Vec<PipelineTag>, _> = params
        .iter()
        .filter(|(key, _)| key == "pipeline_tag")
        .map(|(_, value)| value.parse())
        .collect();

    match tags {
        Ok(tags) => Json(json!({ "models": state.catalog.models(&tags).await })).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/models", get(handler))
        .with_state(state)
}
