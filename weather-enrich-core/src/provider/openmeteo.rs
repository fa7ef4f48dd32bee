use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ProviderError,
    model::{FieldValue, Observation, QueryWindow, WindowStrategy},
    provider::{ProviderId, http, sort_by_time},
};

use super::ProviderClient;

const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Hourly variables requested from the archive.
pub const HOURLY_VARIABLES: &[&str] = &[
    "temperature_2m",
    "precipitation",
    "rain",
    "snowfall",
    "snow_depth",
    "cloud_cover",
    "wind_speed_10m",
    "wind_direction_10m",
    "is_day",
    "sunshine_duration",
];

/// Open-Meteo historical archive, one UTC day per query.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
    base_url: String,
}

impl OpenMeteoProvider {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            base_url: ARCHIVE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct OmHourly {
    time: Vec<i64>,
    #[serde(flatten)]
    variables: BTreeMap<String, Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    #[serde(default)]
    utc_offset_seconds: i32,
    hourly: Option<OmHourly>,
}

/// Normalize an archive response requested with `timeformat=unixtime`.
///
/// The payload is columnar; each time step becomes one observation.
pub fn parse_archive(body: &str) -> Result<Vec<Observation>, ProviderError> {
    let parsed: OmResponse = http::parse_json("Open-Meteo", body)?;
    let Some(hourly) = parsed.hourly else {
        return Ok(Vec::new());
    };

    let offset = FixedOffset::east_opt(parsed.utc_offset_seconds).ok_or_else(|| {
        ProviderError::MalformedResponse(format!(
            "Open-Meteo utc_offset_seconds {} out of range",
            parsed.utc_offset_seconds
        ))
    })?;

    for (name, values) in &hourly.variables {
        if values.len() != hourly.time.len() {
            return Err(ProviderError::MalformedResponse(format!(
                "Open-Meteo variable '{name}' has {} values for {} time steps",
                values.len(),
                hourly.time.len()
            )));
        }
    }

    let mut observations = Vec::with_capacity(hourly.time.len());
    for (i, &epoch) in hourly.time.iter().enumerate() {
        let observed_at = DateTime::from_timestamp(epoch, 0).ok_or_else(|| {
            ProviderError::MalformedResponse(format!("Open-Meteo time {epoch} out of range"))
        })?;

        let mut obs = Observation::new(observed_at.with_timezone(&offset));
        for name in HOURLY_VARIABLES {
            if let Some(values) = hourly.variables.get(*name) {
                obs.set(*name, values[i].map(FieldValue::Number));
            }
        }
        observations.push(obs);
    }

    sort_by_time(&mut observations);
    Ok(observations)
}

#[async_trait]
impl ProviderClient for OpenMeteoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenMeteo
    }

    fn window_strategy(&self) -> WindowStrategy {
        WindowStrategy::UtcDay
    }

    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<Observation>, ProviderError> {
        let day = window.day().format("%Y-%m-%d").to_string();
        let query = [
            ("latitude", window.latitude().to_string()),
            ("longitude", window.longitude().to_string()),
            ("start_date", day.clone()),
            ("end_date", day),
            ("hourly", HOURLY_VARIABLES.join(",")),
            ("timeformat", "unixtime".to_string()),
        ];

        let body = http::get_text(&self.http, "Open-Meteo", &self.base_url, &query).await?;
        parse_archive(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn expands_columns_into_observations() {
        let body = r#"{
            "latitude": 52.52, "longitude": 13.42, "utc_offset_seconds": 0, "timezone": "GMT",
            "hourly_units": {"time": "unixtime", "temperature_2m": "°C"},
            "hourly": {
                "time": [1691366400, 1691370000, 1691373600],
                "temperature_2m": [14.6, 14.1, null],
                "is_day": [0, 0, 0]
            }
        }"#;

        let observations = parse_archive(body).unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(
            observations[1].observed_at,
            Utc.with_ymd_and_hms(2023, 8, 7, 1, 0, 0).unwrap()
        );
        assert_eq!(
            observations[1].field("temperature_2m"),
            Some(&Some(FieldValue::Number(14.1)))
        );
        assert_eq!(observations[2].field("temperature_2m"), Some(&None));
        assert_eq!(observations[0].field("is_day"), Some(&Some(FieldValue::Number(0.0))));
        // Not requested back by the server: omitted, not null.
        assert_eq!(observations[0].field("rain"), None);
    }

    #[test]
    fn mismatched_columns_are_malformed() {
        let body = r#"{"hourly": {"time": [1691366400, 1691370000], "rain": [0.0]}}"#;
        assert!(matches!(
            parse_archive(body),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn missing_hourly_block_means_no_data() {
        assert!(parse_archive(r#"{"latitude": 1.0}"#).unwrap().is_empty());
    }

    #[test]
    fn applies_the_reporting_offset() {
        let body = r#"{"utc_offset_seconds": 7200, "hourly": {"time": [1691402400]}}"#;
        let observations = parse_archive(body).unwrap();
        assert_eq!(observations[0].observed_at.offset().local_minus_utc(), 7200);
        assert_eq!(
            observations[0].observed_at,
            Utc.with_ymd_and_hms(2023, 8, 7, 10, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn fetch_requests_unixtime_columns_for_the_day() {
        let body = r#"{"utc_offset_seconds": 0,
            "hourly": {"time": [1691402400], "temperature_2m": [19.5]}}"#;
        let (url, server) = crate::testing::serve_once("200 OK", body).await;
        let provider = OpenMeteoProvider::new(Client::new()).with_base_url(url);
        let start = Utc.with_ymd_and_hms(2023, 8, 7, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 8, 7, 23, 59, 59).unwrap();
        let window = QueryWindow::new(52.52, 13.4, start, end).unwrap();

        let observations = provider.fetch(&window).await.unwrap();
        let head = server.await.unwrap();

        assert_eq!(observations.len(), 1);
        assert_eq!(
            observations[0].field("temperature_2m"),
            Some(&Some(FieldValue::Number(19.5)))
        );
        assert!(head.contains("start_date=2023-08-07"), "{head}");
        assert!(head.contains("end_date=2023-08-07"), "{head}");
        assert!(head.contains("timeformat=unixtime"), "{head}");
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let (url, server) = crate::testing::serve_once("200 OK", "<html>oops</html>").await;
        let provider = OpenMeteoProvider::new(Client::new()).with_base_url(url);
        let t = Utc.with_ymd_and_hms(2023, 8, 7, 10, 0, 0).unwrap();
        let window = QueryWindow::new(52.52, 13.4, t, t).unwrap();

        assert!(matches!(
            provider.fetch(&window).await,
            Err(ProviderError::MalformedResponse(_))
        ));
        server.await.unwrap();
    }
}
