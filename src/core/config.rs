use crate::core::LLMError;
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

include!(concat!(env!("OUT_DIR"), "/config_embedded.rs"));

const ENV_PREFIX: &str = "RELAY";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Base URL of the hosted multi-provider inference router
    pub hub_base_url: String,
    /// Upper bound on assistant turns within one request
    pub max_rounds: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpConfig {
    /// Bound on connecting to a tool server and on each call to it
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub api_url: String,
    pub limit: u32,
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    /// Router model listing carrying per-provider `context_length`
    pub api_url: String,
    pub ttl_secs: u64,
    /// Where learned limits persist across restarts; memory only when unset
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub mcp: McpConfig,
    pub catalog: CatalogConfig,
    pub budget: BudgetConfig,
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("Invalid default config")
    }
}

impl Config {
    /// Loads `config.toml` from the working directory on top of the defaults.
    pub fn load() -> Result<Self, LLMError> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Layers the embedded defaults, the file at `path` (if it exists) and
    /// `RELAY__SECTION__KEY` environment variables, in that order.
    pub fn load_from(path: &Path) -> Result<Self, LLMError> {
        let settings = config::Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        settings
            .try_deserialize()
            .map_err(|e| LLMError::ConfigError(format!("Failed to parse config: {e}")))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, LLMError> {
        self.server.bind.parse().map_err(|e| {
            LLMError::ConfigError(format!("Invalid bind address '{}': {e}", self.server.bind))
        })
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.mcp.request_timeout_ms)
    }
}
