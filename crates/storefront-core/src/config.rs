//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the last selected business, and the
//! cache/retry settings of the category fetch policy.
//!
//! Configuration is stored at `~/.config/storefront/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_API_BASE_URL;
use crate::models::BusinessId;
use crate::query::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_RETRIES};
use crate::query::RetryPolicy;

/// Application name used for config directory paths
const APP_NAME: &str = "storefront";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_business_id: Option<String>,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    pub fn last_business(&self) -> Option<BusinessId> {
        self.last_business_id.clone().and_then(BusinessId::parse)
    }
}

/// Cache and retry settings for the category fetch policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryConfig {
    /// How long fetched categories are served without refetching.
    pub stale_time_secs: u64,
    /// How long an unobserved entry is kept before eviction.
    pub gc_time_secs: u64,
    /// Retries after the first failed attempt.
    pub retry: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: 5 * 60,
            gc_time_secs: 30 * 60,
            retry: DEFAULT_RETRIES,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl QueryConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_secs)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_time_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}
