use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ProviderError,
    model::{FieldValue, Observation, QueryWindow, WindowStrategy},
    provider::{ProviderId, http, sort_by_time},
};

use super::ProviderClient;

const WEATHER_URL: &str = "https://api.brightsky.dev/weather";

/// Bright Sky (DWD) hourly records for the record's UTC day.
#[derive(Debug, Clone)]
pub struct BrightSkyProvider {
    http: Client,
    base_url: String,
}

impl BrightSkyProvider {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            base_url: WEATHER_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct BsWeather {
    timestamp: String,
    visibility: Option<f64>,
    precipitation: Option<f64>,
    temperature: Option<f64>,
    cloud_cover: Option<f64>,
    sunshine: Option<f64>,
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BsSource {
    distance: Option<f64>,
    station_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BsResponse {
    #[serde(default)]
    weather: Vec<BsWeather>,
    #[serde(default)]
    sources: Vec<BsSource>,
}

/// Normalize a Bright Sky `/weather` response body.
///
/// The nearest station (first source) is attached to every observation.
pub fn parse_weather(body: &str) -> Result<Vec<Observation>, ProviderError> {
    let parsed: BsResponse = http::parse_json("Bright Sky", body)?;
    let source = parsed.sources.into_iter().next();

    let mut observations = Vec::with_capacity(parsed.weather.len());
    for entry in parsed.weather {
        let observed_at = DateTime::parse_from_rfc3339(&entry.timestamp).map_err(|e| {
            ProviderError::MalformedResponse(format!(
                "Bright Sky timestamp '{}' is not RFC 3339: {e}",
                entry.timestamp
            ))
        })?;

        let mut obs = Observation::new(observed_at)
            .with_field("visibility", entry.visibility.map(FieldValue::Number))
            .with_field("precipitation", entry.precipitation.map(FieldValue::Number))
            .with_field("temperature", entry.temperature.map(FieldValue::Number))
            .with_field("cloud_cover", entry.cloud_cover.map(FieldValue::Number))
            .with_field("sunshine", entry.sunshine.map(FieldValue::Number))
            .with_field("condition", entry.condition.map(FieldValue::Text));

        if let Some(source) = &source {
            obs.set("source.distance", source.distance.map(FieldValue::Number));
            obs.set("source.station_name", source.station_name.clone().map(FieldValue::Text));
        }

        observations.push(obs);
    }

    sort_by_time(&mut observations);
    Ok(observations)
}

#[async_trait]
impl ProviderClient for BrightSkyProvider {
    fn id(&self) -> ProviderId {
        ProviderId::BrightSky
    }

    fn window_strategy(&self) -> WindowStrategy {
        WindowStrategy::UtcDay
    }

    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<Observation>, ProviderError> {
        let query = [
            ("lat", window.latitude().to_string()),
            ("lon", window.longitude().to_string()),
            ("date", window.day().format("%Y-%m-%d").to_string()),
        ];

        let body = http::get_text(&self.http, "Bright Sky", &self.base_url, &query).await?;
        parse_weather(&body)
    }
}
