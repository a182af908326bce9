//! Model listings from the Hub, cached per pipeline tag.

use crate::core::config::CatalogConfig;
use crate::core::LLMError;
use futures::future::join_all;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const EXPAND_FIELDS: [&str; 7] = [
    "inferenceProviderMapping",
    "config",
    "library_name",
    "pipeline_tag",
    "tags",
    "mask_token",
    "trendingScore",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineTag {
    TextGeneration,
    ImageTextToText,
    TextToImage,
}

impl PipelineTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TextGeneration => "text-generation",
            Self::ImageTextToText => "image-text-to-text",
            Self::TextToImage => "text-to-image",
        }
    }

    const fn is_conversational(self) -> bool {
        matches!(self, Self::TextGeneration | Self::ImageTextToText)
    }
}

impl fmt::Display for PipelineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineTag {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text-generation" => Ok(Self::TextGeneration),
            "image-text-to-text" => Ok(Self::ImageTextToText),
            "text-to-image" => Ok(Self::TextToImage),
            other => Err(LLMError::ConfigError(format!(
                "Unknown pipeline tag '{other}'"
            ))),
        }
    }
}

struct CacheEntry {
    fetched_at: Instant,
    models: Vec<Value>,
}

/// Fetches model listings and keeps successful results for `ttl`.
pub struct ModelCatalog {
    client: Client,
    api_url: String,
    limit: u32,
    ttl: Duration,
    cache: RwLock<HashMap<PipelineTag, CacheEntry>>,
}

impl ModelCatalog {
    pub fn new(client: Client, config: &CatalogConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            limit: config.limit,
            ttl: Duration::from_secs(config.ttl_secs),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Models for every tag, concatenated in tag order.
    pub async fn models(&self, tags: &[PipelineTag]) -> Vec<Value> {
        join_all(tags.iter().map(|tag| self.models_for_tag(*tag)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Models for one tag. A failed fetch is logged and yields nothing.
    pub async fn models_for_tag(&self, tag: PipelineTag) -> Vec<Value> {
        if let Some(entry) = self.cache.read().await.get(&tag) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!("[Catalog] using cache for {tag}");
                return entry.models.clone();
            }
        }

        debug!("[Catalog] fetching {tag}");
        match self.fetch(tag).await {
            Ok(models) => {
                self.cache.write().await.insert(
                    tag,
                    CacheEntry {
                        fetched_at: Instant::now(),
                        models: models.clone(),
                    },
                );
                models
            }
            Err(e) => {
                warn!("[Catalog] failed to fetch {tag}: {e}");
                Vec::new()
            }
        }
    }

    async fn fetch(&self, tag: PipelineTag) -> Result<Vec<Value>, LLMError> {
        let mut query: Vec<(&str, String)> = vec![
            ("inference_provider", "all".to_string()),
            ("limit", self.limit.to_string()),
            ("pipeline_tag", tag.to_string()),
        ];
        query.extend(EXPAND_FIELDS.iter().map(|f| ("expand[]", (*f).to_string())));
        if tag.is_conversational() {
            query.push(("filter", "conversational".to_string()));
        }

        let response = self
            .client
            .get(&self.api_url)
            .header("Cache-Control", "no-cache")
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LLMError::ApiError(format!(
                "Model listing failed with status {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| LLMError::ResponseFormat(format!("Invalid model listing: {e}")))
    }
}
