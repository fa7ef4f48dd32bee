use crate::{
    Config, Observation, QueryWindow,
    error::ProviderError,
    matcher::MatchPolicy,
    model::WindowStrategy,
    provider::{
        brightsky::BrightSkyProvider, cache::CachingClient, openmeteo::OpenMeteoProvider,
        openweather::OpenWeatherProvider, retry::RetryingClient,
    },
};
use anyhow::Context;
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, time::Duration};

pub mod brightsky;
pub mod cache;
mod http;
pub mod openmeteo;
pub mod openweather;
pub mod retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderId {
    OpenWeather,
    BrightSky,
    OpenMeteo,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::BrightSky => "brightsky",
            ProviderId::OpenMeteo => "openmeteo",
        }
    }

    /// Suffix appended to every output column produced from this provider.
    pub fn column_suffix(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OpenWeather",
            ProviderId::BrightSky => "BrightSky",
            ProviderId::OpenMeteo => "OpenMeteo",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderId::OpenWeather)
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::BrightSky, ProviderId::OpenMeteo]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "brightsky" => Ok(ProviderId::BrightSky),
            "openmeteo" => Ok(ProviderId::OpenMeteo),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. \
                 Supported providers: openweather, brightsky, openmeteo."
            )),
        }
    }
}

/// A weather data source that can answer one bounded historical query.
///
/// Successful results are sorted by `observed_at`, oldest first. An empty list
/// means the provider has no data for the window and is not an error.
#[async_trait]
pub trait ProviderClient: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    /// How records are turned into query windows for this provider.
    fn window_strategy(&self) -> WindowStrategy;

    /// Policy that suits this provider's windows when the caller has not
    /// picked one. `None` leaves the choice to the pipeline.
    fn default_policy(&self) -> Option<MatchPolicy> {
        None
    }

    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<Observation>, ProviderError>;
}

pub(crate) fn sort_by_time(observations: &mut [Observation]) {
    observations.sort_by_key(|o| o.observed_at);
}

/// Build an HTTP client with the per-request timeout every adapter shares.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Construct a bare provider adapter from config, without caching or retries.
pub fn adapter_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Box<dyn ProviderClient>> {
    let http = http_client(config.pipeline.request_timeout())?;

    let boxed: Box<dyn ProviderClient> = match id {
        ProviderId::OpenWeather => {
            let api_key = config.provider_api_key(id).ok_or_else(|| {
                anyhow::anyhow!(
                    "No API key configured for provider '{id}'.\n\
                     Hint: run `weather-enrich configure {id}` and enter your API key."
                )
            })?;
            Box::new(OpenWeatherProvider::new(api_key.to_owned(), http))
        }
        ProviderId::BrightSky => Box::new(BrightSkyProvider::new(http)),
        ProviderId::OpenMeteo => Box::new(OpenMeteoProvider::new(http)),
    };

    Ok(boxed)
}

/// Construct a provider from config: the adapter wrapped in retries and,
/// unless `use_cache` is false, the on-disk response cache.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
    use_cache: bool,
) -> anyhow::Result<Box<dyn ProviderClient>> {
    let adapter = adapter_from_config(id, config)?;
    let retrying: Box<dyn ProviderClient> =
        Box::new(RetryingClient::new(adapter, config.cache.retry_policy()));

    if !use_cache {
        return Ok(retrying);
    }

    let dir = config.cache_dir()?;
    Ok(Box::new(CachingClient::new(retrying, dir, config.cache.ttl)))
}

/// Construct the default provider from config, using `default_provider` field.
pub fn default_provider_from_config(
    config: &Config,
    use_cache: bool,
) -> anyhow::Result<Box<dyn ProviderClient>> {
    let id = config.default_provider_id()?;
    provider_from_config(id, config, use_cache)
}
