use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    config::CacheTtl,
    error::ProviderError,
    matcher::MatchPolicy,
    model::{Observation, QueryWindow, WindowStrategy},
    provider::{ProviderClient, ProviderId},
};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    fetched_at: DateTime<Utc>,
    observations: Vec<Observation>,
}

/// Serves repeated queries from JSON files on disk.
///
/// Only successful responses are stored. Unreadable or stale entries count as
/// misses, and failing to write an entry never fails the fetch.
#[derive(Debug)]
pub struct CachingClient {
    inner: Box<dyn ProviderClient>,
    dir: PathBuf,
    ttl: CacheTtl,
}

impl CachingClient {
    pub fn new(inner: Box<dyn ProviderClient>, dir: PathBuf, ttl: CacheTtl) -> Self {
        Self { inner, dir, ttl }
    }

    /// File holding the cached response for `window`.
    pub fn entry_path(&self, window: &QueryWindow) -> PathBuf {
        let provider = self.inner.id();
        let key = format!(
            "{}|{:.6}|{:.6}|{}|{}",
            provider,
            window.latitude(),
            window.longitude(),
            window.start().to_rfc3339_opts(SecondsFormat::Nanos, true),
            window.end().to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
        let digest = Sha256::digest(key.as_bytes());

        self.dir
            .join(provider.as_str())
            .join(format!("{}.json", hex::encode(digest)))
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        match self.ttl.as_duration() {
            None => true,
            Some(ttl) => match chrono::Duration::from_std(ttl) {
                Ok(ttl) => Utc::now() - entry.fetched_at <= ttl,
                Err(_) => true,
            },
        }
    }

    async fn read(&self, path: &Path) -> Option<CacheEntry> {
        let bytes = fs::read(path).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if self.is_fresh(&entry) => Some(entry),
            Ok(_) => {
                debug!(path = %path.display(), "cache entry expired");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), "ignoring corrupt cache entry: {e}");
                None
            }
        }
    }

    async fn write(&self, path: &Path, observations: &[Observation]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entry = CacheEntry {
            fetched_at: Utc::now(),
            observations: observations.to_vec(),
        };
        let json = serde_json::to_vec(&entry)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await
    }
}

#[async_trait]
impl ProviderClient for CachingClient {
    fn id(&self) -> ProviderId {
        self.inner.id()
    }

    fn window_strategy(&self) -> WindowStrategy {
        self.inner.window_strategy()
    }

    fn default_policy(&self) -> Option<MatchPolicy> {
        self.inner.default_policy()
    }

    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<Observation>, ProviderError> {
        let path = self.entry_path(window);

        if let Some(entry) = self.read(&path).await {
            debug!(provider = %self.id(), path = %path.display(), "cache hit");
            return Ok(entry.observations);
        }

        debug!(provider = %self.id(), "cache miss");
        let observations = self.inner.fetch(window).await?;

        if let Err(e) = self.write(&path, &observations).await {
            warn!(path = %path.display(), "failed to write cache entry: {e}");
        }

        Ok(observations)
    }
}
