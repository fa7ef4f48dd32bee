use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{matcher::MatchPolicy, provider::ProviderId, provider::retry::RetryPolicy};

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

/// How long a cached provider response stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "TtlRepr", into = "TtlRepr")]
pub enum CacheTtl {
    #[default]
    Forever,
    Seconds(u64),
}

impl CacheTtl {
    /// `None` means entries never expire.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            CacheTtl::Forever => None,
            CacheTtl::Seconds(s) => Some(Duration::from_secs(*s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TtlRepr {
    Word(String),
    Seconds(u64),
}

impl TryFrom<TtlRepr> for CacheTtl {
    type Error = String;

    fn try_from(value: TtlRepr) -> Result<Self, Self::Error> {
        match value {
            TtlRepr::Seconds(s) => Ok(CacheTtl::Seconds(s)),
            TtlRepr::Word(w) if w.eq_ignore_ascii_case("forever") => Ok(CacheTtl::Forever),
            TtlRepr::Word(w) => Err(format!(
                "invalid cache ttl '{w}': expected \"forever\" or a number of seconds"
            )),
        }
    }
}

impl From<CacheTtl> for TtlRepr {
    fn from(value: CacheTtl) -> Self {
        match value {
            CacheTtl::Forever => TtlRepr::Word("forever".to_string()),
            CacheTtl::Seconds(s) => TtlRepr::Seconds(s),
        }
    }
}

/// Settings for the response cache and the retry layer beneath it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl: CacheTtl,
    pub max_retries: u32,
    pub backoff_factor: f64,
    /// Overrides the platform cache directory.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: CacheTtl::Forever,
            max_retries: 5,
            backoff_factor: 0.2,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    pub request_timeout_secs: u64,
    /// Applied to every provider when set; otherwise each provider's own
    /// default, then `nearest-by-hour`.
    pub policy: Option<MatchPolicy>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            request_timeout_secs: 30,
            policy: None,
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather" or "brightsky".
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    pub providers: HashMap<String, ProviderConfig>,

    /// Example TOML:
    /// [cache]
    /// ttl = "forever"   # or a number of seconds
    /// max_retries = 5
    /// backoff_factor = 0.2
    pub cache: CacheConfig,

    pub pipeline: PipelineConfig,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `weather-enrich configure <provider>` \
                 (e.g. `weather-enrich configure brightsky`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from the platform location, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    /// Load config from an explicit path, or return defaults if it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to the platform location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "weather-enrich", "weather-enrich")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory holding cached provider responses.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::project_dirs()?.cache_dir().join("responses")),
        }
    }

    /// Longest a single fetch may take through the retry layer: every attempt
    /// hitting the HTTP timeout plus every backoff sleep, plus a second of slack.
    pub fn fetch_budget(&self) -> Duration {
        let retry = self.cache.retry_policy();
        let per_request = self.pipeline.request_timeout();
        let backoff: Duration = (0..retry.max_retries).map(|n| retry.delay(n)).sum();
        per_request * (retry.max_retries + 1) + backoff + Duration::from_secs(1)
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    /// A provider is usable when it needs no key or has one stored.
    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        !provider_id.requires_api_key() || self.provider_api_key(provider_id).is_some()
    }
}
