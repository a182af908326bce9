use crate::budget::TokenBudget;
use crate::catalog::ModelCatalog;
use crate::core::Config;
use crate::mcp::{HttpConnector, McpConnector};
use reqwest::Client;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Client,
    pub connector: Arc<dyn McpConnector>,
    pub catalog: Arc<ModelCatalog>,
    pub budget: Arc<TokenBudget>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let client = Client::new();
        Self {
            connector: Arc::new(HttpConnector::new(client.clone(), &config.mcp)),
            catalog: Arc::new(ModelCatalog::new(client.clone(), &config.catalog)),
            budget: Arc::new(TokenBudget::new(client.clone(), &config.budget)),
            config: Arc::new(config),
            client,
        }
    }

    /// Replaces how tool servers are reached.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn McpConnector>) -> Self {
        self.connector = connector;
        self
    }
}
