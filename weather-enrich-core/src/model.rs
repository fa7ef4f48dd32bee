use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InputError, ProviderError};
use crate::provider::ProviderId;

/// One input telemetry row. Identity is its position in the batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// A row as read from the input: either a usable record or the reason it is not.
pub type RecordInput = Result<Record, InputError>;

impl Record {
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, InputError> {
        check_coordinates(latitude, longitude)?;
        Ok(Self { latitude, longitude, timestamp })
    }

    /// Build a record from raw cell text. The timestamp is nanoseconds since the Unix epoch.
    pub fn parse(latitude: &str, longitude: &str, timestamp: &str) -> Result<Self, InputError> {
        let lat = parse_coordinate("latitude", latitude)?;
        let lon = parse_coordinate("longitude", longitude)?;
        let ts = parse_nanos(timestamp)?;
        Self::new(lat, lon, ts)
    }
}

fn parse_coordinate(name: &str, raw: &str) -> Result<f64, InputError> {
    let raw = raw.trim();
    raw.parse::<f64>()
        .map_err(|_| InputError::InvalidCoordinate(format!("{name} '{raw}' is not a number")))
}

fn parse_nanos(raw: &str) -> Result<DateTime<Utc>, InputError> {
    let raw = raw.trim();
    if let Ok(nanos) = raw.parse::<i64>() {
        return Ok(DateTime::from_timestamp_nanos(nanos));
    }

    // Exports that went through a float column, e.g. "1.6909e18".
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value.abs() < i64::MAX as f64 => {
            Ok(DateTime::from_timestamp_nanos(value as i64))
        }
        _ => Err(InputError::InvalidTimestamp(format!(
            "'{raw}' is not a nanosecond epoch timestamp"
        ))),
    }
}

fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), InputError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(InputError::InvalidCoordinate(format!(
            "latitude {latitude} outside [-90, 90]"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(InputError::InvalidCoordinate(format!(
            "longitude {longitude} outside [-180, 180]"
        )));
    }
    Ok(())
}

/// A single value reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// One timestamped measurement from a provider, in the provider's native field names.
///
/// A key mapped to `None` means the provider sent null; a missing key means it
/// omitted the field (or the whole block it lives in).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observed_at: DateTime<FixedOffset>,
    pub fields: BTreeMap<String, Option<FieldValue>>,
}

impl Observation {
    pub fn new(observed_at: DateTime<FixedOffset>) -> Self {
        Self { observed_at, fields: BTreeMap::new() }
    }

    pub fn at_utc(observed_at: DateTime<Utc>) -> Self {
        Self::new(observed_at.fixed_offset())
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Option<FieldValue>) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Option<FieldValue>) {
        self.fields.insert(key.into(), value);
    }

    /// `Some(None)` when the provider sent null, `None` when the key is missing.
    pub fn field(&self, key: &str) -> Option<&Option<FieldValue>> {
        self.fields.get(key)
    }
}

/// Location and time span sent to a provider for one lookup.
///
/// The record's own timestamp need not fall inside the window, but the window
/// is never inverted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryWindow {
    latitude: f64,
    longitude: f64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

impl QueryWindow {
    pub fn new(
        latitude: f64,
        longitude: f64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Self, InputError> {
        check_coordinates(latitude, longitude)?;
        if window_start > window_end {
            return Err(InputError::InvalidTimestamp(format!(
                "window start {window_start} is after window end {window_end}"
            )));
        }
        Ok(Self { latitude, longitude, window_start, window_end })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.window_end
    }

    /// UTC calendar day the window starts on.
    pub fn day(&self) -> NaiveDate {
        self.window_start.date_naive()
    }
}

/// How a provider turns a record into a query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStrategy {
    /// The whole UTC calendar day containing the record.
    UtcDay,
    /// `timestamp ± half_width`.
    Around(TimeDelta),
}

impl WindowStrategy {
    pub fn window_for(&self, record: &Record) -> Result<QueryWindow, InputError> {
        let (start, end) = match *self {
            WindowStrategy::UtcDay => {
                let start = record.timestamp.date_naive().and_time(NaiveTime::MIN).and_utc();
                let end = start
                    .checked_add_signed(TimeDelta::days(1) - TimeDelta::nanoseconds(1))
                    .ok_or_else(|| out_of_range(record))?;
                (start, end)
            }
            WindowStrategy::Around(half_width) => {
                let half_width = half_width.abs();
                let start = record
                    .timestamp
                    .checked_sub_signed(half_width)
                    .ok_or_else(|| out_of_range(record))?;
                let end = record
                    .timestamp
                    .checked_add_signed(half_width)
                    .ok_or_else(|| out_of_range(record))?;
                (start, end)
            }
        };

        QueryWindow::new(record.latitude, record.longitude, start, end)
    }
}

fn out_of_range(record: &Record) -> InputError {
    InputError::InvalidTimestamp(format!(
        "{} is too close to the representable range",
        record.timestamp
    ))
}

/// Outcome of enriching one record against one provider.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichStatus {
    Matched { offset: TimeDelta },
    NoMatch,
    ProviderError(ProviderError),
    InvalidInput(InputError),
    Cancelled,
}

impl EnrichStatus {
    pub fn is_matched(&self) -> bool {
        matches!(self, EnrichStatus::Matched { .. })
    }

    /// Value written to the status column.
    pub fn label(&self) -> String {
        match self {
            EnrichStatus::Matched { .. } => "matched".to_string(),
            EnrichStatus::NoMatch => "no_match".to_string(),
            EnrichStatus::ProviderError(e) => format!("provider_error:{}", e.kind()),
            EnrichStatus::InvalidInput(e) => format!("invalid_input:{}", e.kind()),
            EnrichStatus::Cancelled => "cancelled".to_string(),
        }
    }
}

/// A record plus the provider columns merged into it. Built once, then only read.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    index: usize,
    record: Option<Record>,
    columns: BTreeMap<String, Option<FieldValue>>,
    statuses: BTreeMap<ProviderId, EnrichStatus>,
}

impl EnrichedRecord {
    pub(crate) fn new(
        index: usize,
        record: Option<Record>,
        provider: ProviderId,
        status: EnrichStatus,
        columns: BTreeMap<String, Option<FieldValue>>,
    ) -> Self {
        let mut statuses = BTreeMap::new();
        statuses.insert(provider, status);
        Self { index, record, columns, statuses }
    }

    /// A row no provider has touched yet.
    pub(crate) fn bare(index: usize, record: Option<Record>) -> Self {
        Self {
            index,
            record,
            columns: BTreeMap::new(),
            statuses: BTreeMap::new(),
        }
    }

    /// Position of the source row in the input batch.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn columns(&self) -> &BTreeMap<String, Option<FieldValue>> {
        &self.columns
    }

    /// `None` when the column is absent for this record or unknown.
    pub fn value(&self, column: &str) -> Option<&FieldValue> {
        self.columns.get(column).and_then(Option::as_ref)
    }

    pub fn status(&self, provider: ProviderId) -> Option<&EnrichStatus> {
        self.statuses.get(&provider)
    }

    pub fn statuses(&self) -> &BTreeMap<ProviderId, EnrichStatus> {
        &self.statuses
    }

    /// Combine two providers' results for the same row into a new record.
    ///
    /// Columns are provider-namespaced, so nothing from `self` is overwritten
    /// unless both sides were produced by the same provider.
    pub fn merge(mut self, other: EnrichedRecord) -> EnrichedRecord {
        debug_assert_eq!(self.index, other.index, "merging records from different rows");
        if self.record.is_none() {
            self.record = other.record;
        }
        self.columns.extend(other.columns);
        self.statuses.extend(other.statuses);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 8, 7, h, m, 0).unwrap()
    }

    #[test]
    fn parses_nanosecond_timestamps() {
        let rec = Record::parse("52.52", "13.40", "1691402100000000000").unwrap();
        assert_eq!(rec.timestamp, ts(10, 0) + TimeDelta::minutes(-5));
        assert_eq!(rec.latitude, 52.52);
    }

    #[test]
    fn accepts_float_formatted_timestamps() {
        let rec = Record::parse("52.52", "13.40", "1.6914021e18").unwrap();
        assert_eq!(rec.timestamp.date_naive(), ts(0, 0).date_naive());
    }

    #[test]
    fn rejects_bad_cells_as_row_errors() {
        assert!(matches!(
            Record::parse("north", "13.4", "0"),
            Err(InputError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            Record::parse("52.5", "13.4", ""),
            Err(InputError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            Record::parse("95.0", "13.4", "0"),
            Err(InputError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            Record::parse("NaN", "13.4", "0"),
            Err(InputError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn query_window_is_never_inverted() {
        let err = QueryWindow::new(0.0, 0.0, ts(11, 0), ts(10, 0)).unwrap_err();
        assert!(matches!(err, InputError::InvalidTimestamp(_)));
        assert!(QueryWindow::new(0.0, 0.0, ts(10, 0), ts(10, 0)).is_ok());
    }

    #[test]
    fn day_window_covers_the_utc_day() {
        let rec = Record::new(52.5, 13.4, ts(10, 15)).unwrap();
        let window = WindowStrategy::UtcDay.window_for(&rec).unwrap();
        assert_eq!(window.start(), ts(0, 0));
        assert_eq!(window.day(), rec.timestamp.date_naive());
        assert_eq!(window.end().date_naive(), rec.timestamp.date_naive());
        assert!(window.end() > ts(23, 59));
    }

    #[test]
    fn around_window_is_centered_on_the_record() {
        let rec = Record::new(52.5, 13.4, ts(10, 15)).unwrap();
        let window = WindowStrategy::Around(TimeDelta::minutes(30)).window_for(&rec).unwrap();
        assert_eq!(window.start(), ts(9, 45));
        assert_eq!(window.end(), ts(10, 45));
    }

    #[test]
    fn merge_keeps_both_providers() {
        let rec = Record::new(1.0, 2.0, ts(10, 0)).unwrap();
        let mut a_cols = BTreeMap::new();
        a_cols.insert(
            "Temperature(Celsius)_OpenWeather".to_string(),
            Some(FieldValue::Number(20.5)),
        );
        let mut b_cols = BTreeMap::new();
        b_cols.insert("Temperature(Celsius)_BrightSky".to_string(), None);

        let a = EnrichedRecord::new(
            3,
            Some(rec),
            ProviderId::OpenWeather,
            EnrichStatus::Matched { offset: TimeDelta::zero() },
            a_cols,
        );
        let b = EnrichedRecord::new(
            3,
            Some(rec),
            ProviderId::BrightSky,
            EnrichStatus::NoMatch,
            b_cols,
        );

        let merged = a.merge(b);
        assert_eq!(merged.columns().len(), 2);
        assert_eq!(
            merged.value("Temperature(Celsius)_OpenWeather"),
            Some(&FieldValue::Number(20.5))
        );
        assert_eq!(merged.value("Temperature(Celsius)_BrightSky"), None);
        assert!(merged.status(ProviderId::OpenWeather).unwrap().is_matched());
        assert_eq!(merged.status(ProviderId::BrightSky), Some(&EnrichStatus::NoMatch));
    }

    #[test]
    fn status_labels() {
        assert_eq!(EnrichStatus::NoMatch.label(), "no_match");
        assert_eq!(
            EnrichStatus::ProviderError(ProviderError::Unauthorized).label(),
            "provider_error:unauthorized"
        );
        assert_eq!(
            EnrichStatus::InvalidInput(InputError::InvalidCoordinate("x".into())).label(),
            "invalid_input:invalid_coordinate"
        );
    }
}
