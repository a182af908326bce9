use log::{debug, info};

use super::args::Args;
use crate::{
    core::{Config, LLMError},
    server::{router, AppState},
};

/// Loads configuration and serves the relay until the listener fails.
pub async fn run(args: Args) -> Result<(), LLMError> {
    let _ = dotenv::dotenv();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    let addr = config.bind_addr()?;

    debug!(
        "[SETTINGS] hub: {}, max_rounds: {}, mcp timeout: {:?}",
        config.inference.hub_base_url,
        config.inference.max_rounds,
        config.request_timeout()
    );

    let app = router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
