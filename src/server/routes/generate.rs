use crate::core::{GenerateRequest, GenerationLoop, GenerationOutput, LLMError};
use crate::mcp::{connect_to_mcp_servers, merged_tools};
use crate::providers::create_adapter;
use crate::providers::hub::AUTO_PROVIDER;
use crate::server::error_response;
use crate::server::state::AppState;
use crate::stream::{SseBody, StreamWriter};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use log::{debug, error, info};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Connects the enabled tool servers, picks the adapter and runs the loop.
///
/// With a writer the turn is streamed into it, and the writer is closed
/// before this returns.
async fn generate(
    state: &AppState,
    request: &GenerateRequest,
    writer: Option<&StreamWriter>,
    cancel: &CancellationToken,
) -> Result<GenerationOutput, LLMError> {
    let connections =
        connect_to_mcp_servers(state.connector.as_ref(), &request.enabled_mcps, cancel).await;
    let tools = merged_tools(&connections);
    info!(
        "MCP: Connected to {} servers with {} tools available",
        connections.len(),
        tools.len()
    );

    let adapter = match create_adapter(request, &state.config, state.client.clone()) {
        Ok(adapter) => adapter,
        Err(e) => {
            if let Some(writer) = writer {
                writer.error(&e);
            }
            return Err(e);
        }
    };
    let generation = GenerationLoop::new(
        adapter.as_ref(),
        &connections,
        state.config.inference.max_rounds,
    );
    let args = request.generation_args(tools, token_limit(state, request).await);

    match writer {
        Some(writer) => generation.run_streaming(args, writer, cancel).await,
        None => generation.run(args, cancel).await,
    }
}

/// Known output ceiling for a hosted model. Custom endpoints are not capped.
async fn token_limit(state: &AppState, request: &GenerateRequest) -> Option<u32> {
    if request.model.is_custom {
        return None;
    }
    let provider = request
        .provider
        .as_deref()
        .filter(|provider| !provider.is_empty())
        .unwrap_or(AUTO_PROVIDER);
    let limit = state.budget.max_tokens(provider, &request.model.id).await;
    debug!("[Generate] token limit for {} via {provider}: {limit:?}", request.model.id);
    limit
}

/// Runs the generation on a background task feeding an SSE body.
///
/// Dropping the body (the client went away) cancels the generation.
fn stream_generation(state: AppState, request: GenerateRequest) -> SseBody {
    let (writer, body) = StreamWriter::channel();
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        tokio::select! {
            result = generate(&state, &request, Some(&writer), &cancel) => {
                if let Err(e) = result {
                    error!("Generation error: {e}");
                }
            }
            () = writer.closed() => {
                debug!("[Generate] client disconnected, cancelling");
                cancel.cancel();
            }
        }
    });
    body
}

async fn handler(
    State(state): State<AppState>,
    request: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    if request.streaming {
        return stream_generation(state, request).into_response();
    }

    match generate(&state, &request, None, &CancellationToken::new()).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => {
            error!("Generation error: {e}");
            error_response(&e)
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(handler))
        .with_state(state)
}
