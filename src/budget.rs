//! Output-token ceilings per provider and model.
//!
//! The router's model listing reports a `context_length` for every provider
//! serving a model. Those figures are kept in memory for `ttl` and, when a
//! cache file is configured, persisted as `{provider: {model: tokens}}` so a
//! restart does not refetch them.

use crate::core::config::BudgetConfig;
use crate::core::LLMError;
use crate::providers::hub::AUTO_PROVIDER;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;

type Limits = HashMap<String, HashMap<String, u32>>;

#[derive(Debug, Deserialize)]
struct RouterListing {
    data: Vec<RouterModel>,
}

#[derive(Debug, Deserialize)]
struct RouterModel {
    id: String,
    #[serde(default)]
    providers: Vec<RouterProvider>,
}

#[derive(Debug, Deserialize)]
struct RouterProvider {
    provider: String,
    #[serde(default)]
    context_length: Option<u32>,
}

struct Snapshot {
    fetched_at: Instant,
    limits: Limits,
}

/// Max-token lookups backed by the router's model listing.
pub struct TokenBudget {
    client: Client,
    api_url: String,
    ttl: Duration,
    cache_path: Option<PathBuf>,
    snapshot: RwLock<Option<Snapshot>>,
}

impl TokenBudget {
    pub fn new(client: Client, config: &BudgetConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            ttl: Duration::from_secs(config.ttl_secs),
            cache_path: config.cache_path.clone(),
            snapshot: RwLock::new(None),
        }
    }

    /// The largest `max_tokens` `provider` accepts for `model`, if known.
    ///
    /// For `auto` this is the smallest limit across the model's providers,
    /// since the router may pick any of them.
    pub async fn max_tokens(&self, provider: &str, model: &str) -> Option<u32> {
        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            if snapshot.fetched_at.elapsed() < self.ttl {
                return lookup(&snapshot.limits, provider, model);
            }
        }

        let limits = match self.load_file().await {
            Some(limits) => limits,
            None => match self.fetch().await {
                Ok(limits) => {
                    self.store_file(&limits).await;
                    limits
                }
                Err(e) => {
                    warn!("[Budget] failed to fetch model limits: {e}");
                    return None;
                }
            },
        };

        let found = lookup(&limits, provider, model);
        *self.snapshot.write().await = Some(Snapshot {
            fetched_at: Instant::now(),
            limits,
        });
        found
    }

    /// Forgets every known limit, in memory and on disk.
    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
        if let Some(path) = &self.cache_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("[Budget] removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("[Budget] failed to remove {}: {e}", path.display()),
            }
        }
    }

    async fn fetch(&self) -> Result<Limits, LLMError> {
        debug!("[Budget] fetching {}", self.api_url);
        let response = self.client.get(&self.api_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LLMError::ApiError(format!(
                "Model limits request failed with status {status}"
            )));
        }
        let listing: RouterListing = response
            .json()
            .await
            .map_err(|e| LLMError::ResponseFormat(format!("Invalid model limits: {e}")))?;

        let mut limits = Limits::new();
        for model in listing.data {
            for provider in model.providers {
                if let Some(tokens) = provider.context_length {
                    limits
                        .entry(provider.provider)
                        .or_default()
                        .insert(model.id.clone(), tokens);
                }
            }
        }
        Ok(limits)
    }

    /// Reads the cache file when it was written within `ttl`.
    async fn load_file(&self) -> Option<Limits> {
        let path = self.cache_path.as_deref()?;
        let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age >= self.ttl {
            debug!("[Budget] {} is stale", path.display());
            return None;
        }

        let data = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&data) {
            Ok(limits) => {
                debug!("[Budget] using {}", path.display());
                Some(limits)
            }
            Err(e) => {
                warn!("[Budget] ignoring unreadable {}: {e}", path.display());
                None
            }
        }
    }

    async fn store_file(&self, limits: &Limits) {
        let Some(path) = self.cache_path.as_deref() else {
            return;
        };
        if let Err(e) = write_atomically(path, limits).await {
            warn!("[Budget] failed to write {}: {e}", path.display());
        }
    }
}

/// Writes next to `path` and renames over it so readers never see a partial file.
async fn write_atomically(path: &Path, limits: &Limits) -> Result<(), LLMError> {
    let body =
        serde_json::to_vec_pretty(limits).map_err(|e| LLMError::IOError(e.to_string()))?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    tokio::fs::write(&temp, body).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

fn lookup(limits: &Limits, provider: &str, model: &str) -> Option<u32> {
    if provider == AUTO_PROVIDER {
        return limits
            .values()
            .filter_map(|models| models.get(model))
            .copied()
            .min();
    }
    limits.get(provider)?.get(model).copied()
}
