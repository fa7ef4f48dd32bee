use std::collections::BTreeMap;

use crate::model::{FieldValue, Observation};
use crate::provider::ProviderId;

/// One output column and the provider field that feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Provider-independent name, e.g. `Temperature(Celsius)`.
    pub semantic: &'static str,
    /// Key in [`Observation::fields`]; nested blocks use dotted paths.
    pub source: &'static str,
    /// Same value on every observation of a response, e.g. the reporting station.
    pub per_response: bool,
}

impl FieldSpec {
    pub const fn new(semantic: &'static str, source: &'static str) -> Self {
        Self { semantic, source, per_response: false }
    }

    pub const fn per_response(semantic: &'static str, source: &'static str) -> Self {
        Self { semantic, source, per_response: true }
    }
}

const fn spec(semantic: &'static str, source: &'static str) -> FieldSpec {
    FieldSpec::new(semantic, source)
}

const OPENWEATHER_FIELDS: &[FieldSpec] = &[
    spec("Temperature(Celsius)", "main.temp"),
    spec("Feels_Like(Celsius)", "main.feels_like"),
    spec("Pressure(hPa)", "main.pressure"),
    spec("Humidity(%)", "main.humidity"),
    spec("Temp_Min(Celsius)", "main.temp_min"),
    spec("Temp_Max(Celsius)", "main.temp_max"),
    spec("Wind_Speed(m/s)", "wind.speed"),
    spec("Wind_Direction(deg)", "wind.deg"),
    spec("Cloud_Cover", "clouds.all"),
    spec("Weather_Main", "weather.main"),
    spec("Weather_Description", "weather.description"),
];

const BRIGHTSKY_FIELDS: &[FieldSpec] = &[
    spec("Visibility(m)", "visibility"),
    spec("Precipitation(mm)", "precipitation"),
    spec("Temperature(Celsius)", "temperature"),
    spec("Cloud_cover", "cloud_cover"),
    spec("Sunshine(Mins/last hour)", "sunshine"),
    spec("Weather_Condition", "condition"),
    FieldSpec::per_response("weather_station_distance (m)", "source.distance"),
    FieldSpec::per_response("weather_station_name", "source.station_name"),
];

const OPENMETEO_FIELDS: &[FieldSpec] = &[
    spec("Temperature(Celsius)", "temperature_2m"),
    spec("Precipitation(mm)", "precipitation"),
    spec("Rain(mm)", "rain"),
    spec("Snowfall(cm)", "snowfall"),
    spec("Snow_Depth(m)", "snow_depth"),
    spec("Cloud_Cover(%)", "cloud_cover"),
    spec("Wind_Speed(km/h)", "wind_speed_10m"),
    spec("Wind_Direction(deg)", "wind_direction_10m"),
    spec("Is_Day", "is_day"),
    spec("Sunshine_Duration(s)", "sunshine_duration"),
];

/// Projects a provider's native observation fields onto namespaced output columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapper {
    fields: Vec<FieldSpec>,
}

impl FieldMapper {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// The canonical column table for a built-in provider.
    pub fn for_provider(id: ProviderId) -> Self {
        let fields = match id {
            ProviderId::OpenWeather => OPENWEATHER_FIELDS,
            ProviderId::BrightSky => BRIGHTSKY_FIELDS,
            ProviderId::OpenMeteo => OPENMETEO_FIELDS,
        };
        Self::new(fields.to_vec())
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Output column name for `semantic` under `provider`.
    pub fn column_name(semantic: &str, provider: ProviderId) -> String {
        format!("{semantic}_{}", provider.column_suffix())
    }

    /// Output columns in declaration order.
    pub fn columns(&self, provider: ProviderId) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| Self::column_name(f.semantic, provider))
            .collect()
    }

    /// Every column set to absent; used when a record has nothing to merge.
    pub fn absent(&self, provider: ProviderId) -> BTreeMap<String, Option<FieldValue>> {
        self.columns(provider).into_iter().map(|c| (c, None)).collect()
    }

    /// Map `obs` onto this mapper's columns.
    ///
    /// Every declared column appears in the result. Fields the provider sent
    /// as null and fields it omitted both come out as `None`.
    pub fn project(
        &self,
        obs: &Observation,
        provider: ProviderId,
    ) -> BTreeMap<String, Option<FieldValue>> {
        self.fields
            .iter()
            .map(|f| {
                let value = obs.field(f.source).cloned().flatten();
                (Self::column_name(f.semantic, provider), value)
            })
            .collect()
    }

    /// Columns for a record no candidate matched.
    ///
    /// Per-response fields are still taken from the first candidate; the rest
    /// stay absent.
    pub fn project_unmatched(
        &self,
        candidates: &[Observation],
        provider: ProviderId,
    ) -> BTreeMap<String, Option<FieldValue>> {
        let first = candidates.first();
        self.fields
            .iter()
            .map(|f| {
                let value = match first {
                    Some(obs) if f.per_response => obs.field(f.source).cloned().flatten(),
                    _ => None,
                };
                (Self::column_name(f.semantic, provider), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn observation() -> Observation {
        Observation::at_utc(Utc.with_ymd_and_hms(2023, 8, 7, 10, 0, 0).unwrap())
    }

    #[test]
    fn columns_are_namespaced_by_provider() {
        let mapper = FieldMapper::for_provider(ProviderId::OpenWeather);
        let cols = mapper.columns(ProviderId::OpenWeather);
        assert_eq!(cols[0], "Temperature(Celsius)_OpenWeather");
        assert!(cols.iter().all(|c| c.ends_with("_OpenWeather")));
    }

    #[test]
    fn projects_present_values() {
        let obs = observation()
            .with_field("main.temp", Some(FieldValue::Number(21.4)))
            .with_field("weather.description", Some("light rain".into()));

        let mapper = FieldMapper::for_provider(ProviderId::OpenWeather);
        let projected = mapper.project(&obs, ProviderId::OpenWeather);

        assert_eq!(projected.len(), mapper.fields().len());
        assert_eq!(
            projected["Temperature(Celsius)_OpenWeather"],
            Some(FieldValue::Number(21.4))
        );
        assert_eq!(
            projected["Weather_Description_OpenWeather"],
            Some(FieldValue::Text("light rain".into()))
        );
    }

    #[test]
    fn missing_nested_block_yields_absent_not_zero() {
        // No `wind.*` keys at all: the provider omitted the whole block.
        let obs = observation()
            .with_field("main.temp", Some(FieldValue::Number(0.0)))
            .with_field("clouds.all", None);

        let mapper = FieldMapper::for_provider(ProviderId::OpenWeather);
        let projected = mapper.project(&obs, ProviderId::OpenWeather);

        assert_eq!(projected["Wind_Speed(m/s)_OpenWeather"], None);
        assert_eq!(projected["Wind_Direction(deg)_OpenWeather"], None);
        assert_eq!(projected["Cloud_Cover_OpenWeather"], None);
        // A real zero stays a zero.
        assert_eq!(
            projected["Temperature(Celsius)_OpenWeather"],
            Some(FieldValue::Number(0.0))
        );
    }

    #[test]
    fn two_providers_never_share_a_column() {
        let ow =
            FieldMapper::for_provider(ProviderId::OpenWeather).columns(ProviderId::OpenWeather);
        let bs = FieldMapper::for_provider(ProviderId::BrightSky).columns(ProviderId::BrightSky);
        let om = FieldMapper::for_provider(ProviderId::OpenMeteo).columns(ProviderId::OpenMeteo);

        for col in &ow {
            assert!(!bs.contains(col) && !om.contains(col), "{col} collides");
        }
        for col in &bs {
            assert!(!om.contains(col), "{col} collides");
        }
    }

    #[test]
    fn absent_covers_every_column() {
        let mapper = FieldMapper::for_provider(ProviderId::BrightSky);
        let absent = mapper.absent(ProviderId::BrightSky);
        assert_eq!(absent.len(), mapper.fields().len());
        assert!(absent.values().all(Option::is_none));
    }

    #[test]
    fn custom_tables_are_supported() {
        let mapper = FieldMapper::new(vec![FieldSpec::new("Gust(m/s)", "wind.gust")]);
        let obs = observation().with_field("wind.gust", Some(FieldValue::Number(7.5)));
        let projected = mapper.project(&obs, ProviderId::OpenWeather);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected["Gust(m/s)_OpenWeather"], Some(FieldValue::Number(7.5)));
    }

    #[test]
    fn unmatched_rows_keep_station_metadata() {
        let candidates = vec![
            observation()
                .with_field("temperature", Some(FieldValue::Number(14.1)))
                .with_field("source.station_name", Some("Berlin-Tempelhof".into()))
                .with_field("source.distance", Some(FieldValue::Number(4712.0))),
        ];

        let mapper = FieldMapper::for_provider(ProviderId::BrightSky);
        let projected = mapper.project_unmatched(&candidates, ProviderId::BrightSky);

        assert_eq!(projected.len(), mapper.fields().len());
        assert_eq!(
            projected["weather_station_name_BrightSky"],
            Some(FieldValue::Text("Berlin-Tempelhof".into()))
        );
        assert_eq!(
            projected["weather_station_distance (m)_BrightSky"],
            Some(FieldValue::Number(4712.0))
        );
        assert_eq!(projected["Temperature(Celsius)_BrightSky"], None);
        assert_eq!(
            mapper.project_unmatched(&[], ProviderId::BrightSky),
            mapper.absent(ProviderId::BrightSky)
        );
    }
}
