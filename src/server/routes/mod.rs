pub mod generate;
pub mod models;
pub mod snippets;

use super::state::AppState;
use axum::Router;

/// Every relay route, mounted under `/api`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(generate::routes(state.clone()))
        .merge(models::routes(state.clone()))
        .merge(snippets::routes(state))
}
