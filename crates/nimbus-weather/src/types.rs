use chrono::{DateTime, FixedOffset, Utc};
use nimbus_core::{Classify, FailureClass};
use serde::{Deserialize, Deserializer, Serialize};

use crate::time::parse_local;

/// Geographic location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Display name used in alert and summary text
    pub locality: Option<String>,
}

/// Open-Meteo reports `is_day` as 0/1.
fn flag_from_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    Ok(value != 0)
}

/// Snapshot of the weather at a single timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub time: String,
    #[serde(rename = "temperature_2m")]
    pub temperature: f64,
    pub apparent_temperature: f64,
    #[serde(rename = "relative_humidity_2m")]
    pub humidity: u8,
    #[serde(deserialize_with = "flag_from_int")]
    pub is_day: bool,
    pub precipitation: f64,
    pub weather_code: i32,
    pub cloud_cover: u8,
    #[serde(rename = "wind_speed_10m")]
    pub wind_speed: f64,
    #[serde(rename = "wind_direction_10m")]
    pub wind_direction: f64,
}

/// Hourly forecast as parallel arrays aligned with `time`.
///
/// A `None` at index `i` means the value is unavailable for that hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m")]
    pub temperature: Vec<Option<f64>>,
    #[serde(rename = "relative_humidity_2m")]
    pub humidity: Vec<Option<u8>>,
    pub apparent_temperature: Vec<Option<f64>>,
    pub precipitation_probability: Vec<Option<u8>>,
    pub weather_code: Vec<Option<i32>>,
    pub cloud_cover: Vec<Option<u8>>,
    #[serde(rename = "wind_speed_10m")]
    pub wind_speed: Vec<Option<f64>>,
    /// Offset of the local wall-clock times in `time`.
    ///
    /// The API reports one offset for the whole response, taken at request
    /// time. Samples past a daylight-saving change in the location's zone
    /// resolve one hour off.
    #[serde(skip)]
    pub utc_offset_seconds: i32,
}

impl ForecastSeries {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Absolute time of sample `index`, if it exists and parses.
    ///
    /// Every sample uses `utc_offset_seconds`; see the note on that field.
    pub fn timestamp(&self, index: usize) -> Option<DateTime<FixedOffset>> {
        let raw = self.time.get(index)?;
        parse_local(raw, self.utc_offset_seconds)
    }

    fn check_alignment(&self) -> Result<(), FetchError> {
        let expected = self.time.len();
        let lengths = [
            ("temperature_2m", self.temperature.len()),
            ("relative_humidity_2m", self.humidity.len()),
            ("apparent_temperature", self.apparent_temperature.len()),
            ("precipitation_probability", self.precipitation_probability.len()),
            ("weather_code", self.weather_code.len()),
            ("cloud_cover", self.cloud_cover.len()),
            ("wind_speed_10m", self.wind_speed.len()),
        ];
        check_lengths("hourly", expected, &lengths)
    }
}

/// Per-day forecast as parallel arrays aligned with `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub time: Vec<String>,
    pub weather_code: Vec<Option<i32>>,
    #[serde(rename = "temperature_2m_max")]
    pub temperature_max: Vec<Option<f64>>,
    #[serde(rename = "temperature_2m_min")]
    pub temperature_min: Vec<Option<f64>>,
    pub precipitation_sum: Vec<Option<f64>>,
    #[serde(rename = "wind_speed_10m_max")]
    pub wind_speed_max: Vec<Option<f64>>,
    pub precipitation_probability_max: Vec<Option<u8>>,
    pub sunrise: Vec<Option<String>>,
    pub sunset: Vec<Option<String>>,
}

impl DailySummary {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Today's high and low, when both are present.
    pub fn today_range(&self) -> Option<(f64, f64)> {
        let high = self.temperature_max.first().copied().flatten()?;
        let low = self.temperature_min.first().copied().flatten()?;
        Some((high, low))
    }

    fn check_alignment(&self) -> Result<(), FetchError> {
        let expected = self.time.len();
        let lengths = [
            ("weather_code", self.weather_code.len()),
            ("temperature_2m_max", self.temperature_max.len()),
            ("temperature_2m_min", self.temperature_min.len()),
            ("precipitation_sum", self.precipitation_sum.len()),
            ("wind_speed_10m_max", self.wind_speed_max.len()),
            (
                "precipitation_probability_max",
                self.precipitation_probability_max.len(),
            ),
            ("sunrise", self.sunrise.len()),
            ("sunset", self.sunset.len()),
        ];
        check_lengths("daily", expected, &lengths)
    }
}

fn check_lengths(
    section: &str,
    expected: usize,
    lengths: &[(&str, usize)],
) -> Result<(), FetchError> {
    for (field, len) in lengths {
        if *len != expected {
            return Err(FetchError::DecodeError(format!(
                "{}.{} has {} entries, expected {}",
                section, field, len, expected
            )));
        }
    }
    Ok(())
}

/// Complete result of one successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub current: CurrentConditions,
    pub hourly: ForecastSeries,
    pub daily: DailySummary,
    pub utc_offset_seconds: i32,
    pub fetched_at: DateTime<Utc>,
}

/// Wire shape of the forecast endpoint; only the fields we use.
#[derive(Debug, Deserialize)]
pub(crate) struct ForecastResponse {
    #[serde(default)]
    utc_offset_seconds: i32,
    current: CurrentConditions,
    hourly: ForecastSeries,
    daily: DailySummary,
}

impl ForecastResponse {
    pub(crate) fn into_forecast(self, fetched_at: DateTime<Utc>) -> Result<Forecast, FetchError> {
        self.hourly.check_alignment()?;
        self.daily.check_alignment()?;

        let mut hourly = self.hourly;
        hourly.utc_offset_seconds = self.utc_offset_seconds;

        Ok(Forecast {
            current: self.current,
            hourly,
            daily: self.daily,
            utc_offset_seconds: self.utc_offset_seconds,
            fetched_at,
        })
    }
}

/// Location collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("No location available")]
    Unavailable,
    #[error("Location request timed out")]
    Timeout,
    #[error("Location error: {0}")]
    Other(String),
}

impl Classify for LocationError {
    fn class(&self) -> FailureClass {
        FailureClass::Collaborator
    }
}

/// Forecast fetch errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid forecast request: {0}")]
    InvalidRequest(String),
    #[error("Too many requests to the forecast service")]
    RateLimited,
    #[error("Forecast server error with status code {0}")]
    ServerError(u16),
    #[error("Forecast request failed with status code {0}")]
    NetworkError(u16),
    #[error("Could not decode forecast response: {0}")]
    DecodeError(String),
    #[error("Forecast transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl Classify for FetchError {
    fn class(&self) -> FailureClass {
        match self {
            FetchError::InvalidRequest(_) => FailureClass::Config,
            FetchError::RateLimited | FetchError::ServerError(_) => FailureClass::TransientServer,
            FetchError::NetworkError(_) | FetchError::Transport(_) => {
                FailureClass::PermanentRequest
            }
            FetchError::DecodeError(_) => FailureClass::Decode,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn sample_response() -> serde_json::Value {
        serde_json::json!({
            "latitude": 52.52,
            "longitude": 13.41,
            "utc_offset_seconds": 7200,
            "current": {
                "time": "2025-06-15T10:00",
                "interval": 900,
                "temperature_2m": 21.4,
                "relative_humidity_2m": 55,
                "apparent_temperature": 20.9,
                "is_day": 1,
                "precipitation": 0.0,
                "weather_code": 2,
                "cloud_cover": 40,
                "wind_speed_10m": 11.2,
                "wind_direction_10m": 250
            },
            "hourly": {
                "time": ["2025-06-15T10:00", "2025-06-15T11:00"],
                "temperature_2m": [21.4, null],
                "relative_humidity_2m": [55, 60],
                "apparent_temperature": [20.9, 21.0],
                "precipitation_probability": [10, null],
                "weather_code": [2, 61],
                "cloud_cover": [40, 90],
                "wind_speed_10m": [11.2, 12.0]
            },
            "daily": {
                "time": ["2025-06-15"],
                "weather_code": [61],
                "temperature_2m_max": [24.0],
                "temperature_2m_min": [14.5],
                "precipitation_sum": [3.2],
                "wind_speed_10m_max": [20.1],
                "precipitation_probability_max": [70],
                "sunrise": ["2025-06-15T04:43"],
                "sunset": ["2025-06-15T21:31"]
            }
        })
    }

    #[test]
    fn test_decode_keeps_nulls_as_none() {
        let response: ForecastResponse = serde_json::from_value(sample_response()).unwrap();
        let forecast = response.into_forecast(Utc::now()).unwrap();

        assert_eq!(forecast.hourly.len(), 2);
        assert_eq!(forecast.hourly.temperature[1], None);
        assert_eq!(forecast.hourly.precipitation_probability[0], Some(10));
        assert!(forecast.current.is_day);
        assert_eq!(forecast.hourly.utc_offset_seconds, 7200);
    }

    #[test]
    fn test_timestamp_applies_offset() {
        let response: ForecastResponse = serde_json::from_value(sample_response()).unwrap();
        let forecast = response.into_forecast(Utc::now()).unwrap();

        let ts = forecast.hourly.timestamp(0).unwrap();
        assert_eq!(ts.with_timezone(&Utc).to_rfc3339(), "2025-06-15T08:00:00+00:00");
        assert!(forecast.hourly.timestamp(5).is_none());
    }

    #[test]
    fn test_misaligned_arrays_are_decode_errors() {
        let mut value = sample_response();
        value["hourly"]["weather_code"] = serde_json::json!([2]);
        let response: ForecastResponse = serde_json::from_value(value).unwrap();

        let err = response.into_forecast(Utc::now()).unwrap_err();
        assert!(matches!(err, FetchError::DecodeError(ref m) if m.contains("hourly.weather_code")));
    }

    #[test]
    fn test_missing_daily_fails_to_decode() {
        let mut value = sample_response();
        value.as_object_mut().unwrap().remove("daily");
        assert!(serde_json::from_value::<ForecastResponse>(value).is_err());
    }

    #[test]
    fn test_today_range_requires_both_values() {
        let response: ForecastResponse = serde_json::from_value(sample_response()).unwrap();
        let mut daily = response.daily;
        assert_eq!(daily.today_range(), Some((24.0, 14.5)));

        daily.temperature_min[0] = None;
        assert_eq!(daily.today_range(), None);
    }

    #[test]
    fn test_fetch_error_classes() {
        assert_eq!(FetchError::RateLimited.class(), FailureClass::TransientServer);
        assert_eq!(FetchError::ServerError(503).class(), FailureClass::TransientServer);
        assert_eq!(FetchError::NetworkError(404).class(), FailureClass::PermanentRequest);
        assert_eq!(FetchError::DecodeError("x".into()).class(), FailureClass::Decode);
        assert_eq!(
            FetchError::InvalidRequest("bad".into()).class(),
            FailureClass::Config
        );
        assert_eq!(LocationError::Unavailable.class(), FailureClass::Collaborator);
    }

    #[test]
    fn test_timestamps_share_response_offset() {
        // Europe/Berlin switches to CEST on 2026-03-29; the series keeps +01:00
        let series = ForecastSeries {
            time: vec!["2026-03-28T12:00".to_string(), "2026-03-30T12:00".to_string()],
            temperature: vec![None, None],
            humidity: vec![None, None],
            apparent_temperature: vec![None, None],
            precipitation_probability: vec![None, None],
            weather_code: vec![None, None],
            cloud_cover: vec![None, None],
            wind_speed: vec![None, None],
            utc_offset_seconds: 3600,
        };

        let before = series.timestamp(0).unwrap();
        let after = series.timestamp(1).unwrap();
        assert_eq!(before.offset(), after.offset());
        assert_eq!(after.offset().local_minus_utc(), 3600);
        assert_eq!(after - before, chrono::Duration::hours(48));
        assert_eq!(series.timestamp(2), None);
    }
}
