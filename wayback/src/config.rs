//! Runtime configuration.
//!
//! Settings come from a JSON file; every field has a default, so a partial
//! file (or none at all) is fine.

use crate::fetcher::{CacheTtls, FetchConfig};
use crate::recommend::RecommendationConfig;
use crate::youtube_api::RouterConfig;
use crate::youtube_api::router::{DEFAULT_BASE_URL, MAX_ATTEMPTS_CAP};
use eyre::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "WAYBACK_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "wayback.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub fetch: FetchConfig,
    pub cache: CacheTtls,
    pub recommendations: RecommendationConfig,
    /// Where credentials, health statistics and cached results are kept.
    pub store_path: PathBuf,
    /// Fixed seed for every random draw, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            fetch: FetchConfig::default(),
            cache: CacheTtls::default(),
            recommendations: RecommendationConfig::default(),
            store_path: PathBuf::from("wayback-store.json"),
            seed: None,
        }
    }
}

impl Settings {
    /// Loads from `$WAYBACK_CONFIG`, or `wayback.json` in the working directory.
    pub async fn load() -> eyre::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path).await
    }

    /// Loads from `path`, falling back to defaults if the file does not exist.
    pub async fn load_from(path: &Path) -> eyre::Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("check for settings file {}", path.display()))?
        {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read settings file {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("parse settings file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub http_backoff_ms: u64,
    pub network_backoff_ms: u64,
    pub max_attempts_cap: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
            http_backoff_ms: 500,
            network_backoff_ms: 1000,
            max_attempts_cap: MAX_ATTEMPTS_CAP,
        }
    }
}

impl From<&ApiSettings> for RouterConfig {
    fn from(api: &ApiSettings) -> Self {
        RouterConfig {
            base_url: api.base_url.clone(),
            request_timeout: Duration::from_secs(api.request_timeout_secs),
            http_backoff: Duration::from_millis(api.http_backoff_ms),
            network_backoff: Duration::from_millis(api.network_backoff_ms),
            max_attempts_cap: api.max_attempts_cap.max(1),
        }
    }
}
