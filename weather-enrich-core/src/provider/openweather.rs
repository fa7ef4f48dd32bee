use async_trait::async_trait;
use chrono::{DateTime, TimeDelta};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ProviderError,
    matcher::MatchPolicy,
    model::{FieldValue, Observation, QueryWindow, WindowStrategy},
    provider::{ProviderId, http, sort_by_time},
};

use super::ProviderClient;

const HISTORY_URL: &str = "https://history.openweathermap.org/data/2.5/history/city";

/// OpenWeather hourly history, queried ±30 minutes around each record.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    base_url: String,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            http,
            base_url: HISTORY_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: Option<f64>,
    feels_like: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwClouds {
    all: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwHistoryEntry {
    dt: i64,
    main: Option<OwMain>,
    wind: Option<OwWind>,
    clouds: Option<OwClouds>,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

#[derive(Debug, Deserialize)]
struct OwHistoryResponse {
    // Absent when the window holds no data.
    #[serde(default)]
    list: Vec<OwHistoryEntry>,
}

fn num(v: Option<f64>) -> Option<FieldValue> {
    v.map(FieldValue::Number)
}

fn text(v: Option<String>) -> Option<FieldValue> {
    v.map(FieldValue::Text)
}

impl OwHistoryEntry {
    fn into_observation(self) -> Result<Observation, ProviderError> {
        let observed_at = DateTime::from_timestamp(self.dt, 0).ok_or_else(|| {
            ProviderError::MalformedResponse(format!("OpenWeather dt {} out of range", self.dt))
        })?;
        let mut obs = Observation::at_utc(observed_at);

        if let Some(main) = self.main {
            obs.set("main.temp", num(main.temp));
            obs.set("main.feels_like", num(main.feels_like));
            obs.set("main.pressure", num(main.pressure));
            obs.set("main.humidity", num(main.humidity));
            obs.set("main.temp_min", num(main.temp_min));
            obs.set("main.temp_max", num(main.temp_max));
        }
        if let Some(wind) = self.wind {
            obs.set("wind.speed", num(wind.speed));
            obs.set("wind.deg", num(wind.deg));
        }
        if let Some(clouds) = self.clouds {
            obs.set("clouds.all", num(clouds.all));
        }
        if let Some(weather) = self.weather.into_iter().next() {
            obs.set("weather.main", text(weather.main));
            obs.set("weather.description", text(weather.description));
        }

        Ok(obs)
    }
}

/// Normalize an OpenWeather history response body.
pub fn parse_history(body: &str) -> Result<Vec<Observation>, ProviderError> {
    let parsed: OwHistoryResponse = http::parse_json("OpenWeather", body)?;

    let mut observations = parsed
        .list
        .into_iter()
        .map(OwHistoryEntry::into_observation)
        .collect::<Result<Vec<_>, _>>()?;
    sort_by_time(&mut observations);
    Ok(observations)
}

#[async_trait]
impl ProviderClient for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    fn window_strategy(&self) -> WindowStrategy {
        WindowStrategy::Around(TimeDelta::minutes(30))
    }

    /// A ±30 minute window around a late-in-the-hour record only holds the
    /// next hour's entry, which hour-of-day matching would reject.
    fn default_policy(&self) -> Option<MatchPolicy> {
        Some(MatchPolicy::NearestAbsolute)
    }

    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<Observation>, ProviderError> {
        let query = [
            ("lat", window.latitude().to_string()),
            ("lon", window.longitude().to_string()),
            ("type", "hour".to_string()),
            ("start", window.start().timestamp().to_string()),
            ("end", window.end().timestamp().to_string()),
            ("units", "metric".to_string()),
            ("appid", self.api_key.clone()),
        ];

        let body = http::get_text(&self.http, "OpenWeather", &self.base_url, &query).await?;
        parse_history(&body)
    }
}
