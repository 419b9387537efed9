//! Forecast fetcher for the Open-Meteo API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nimbus_services::retry::{is_retryable_status, RetryDecision, RetryPolicy, RetryState};
use reqwest::{Client, StatusCode};
use tracing::instrument;
use url::Url;

use crate::types::{FetchError, Forecast, ForecastResponse};

const USER_AGENT: &str = "Nimbus/0.1.0";

const CURRENT_FIELDS: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "apparent_temperature",
    "is_day",
    "precipitation",
    "weather_code",
    "cloud_cover",
    "wind_speed_10m",
    "wind_direction_10m",
];

const HOURLY_FIELDS: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "apparent_temperature",
    "precipitation_probability",
    "weather_code",
    "cloud_cover",
    "wind_speed_10m",
];

const DAILY_FIELDS: &[&str] = &[
    "weather_code",
    "temperature_2m_max",
    "temperature_2m_min",
    "precipitation_sum",
    "wind_speed_10m_max",
    "precipitation_probability_max",
    "sunrise",
    "sunset",
];

/// Anything that can produce a forecast for a coordinate pair.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Forecast, FetchError>;
}

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Client,
    base_url: String,
    forecast_days: u8,
    policy: RetryPolicy,
}

impl WeatherProvider {
    pub fn with_options(
        base_url: &str,
        forecast_days: u8,
        policy: RetryPolicy,
        timeout_secs: u64,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            forecast_days,
            policy,
        })
    }

    /// Build the request URL. Fails without touching the network.
    pub fn request_url(&self, latitude: f64, longitude: f64) -> Result<Url, FetchError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(FetchError::InvalidRequest(format!(
                "coordinates must be finite, got ({}, {})",
                latitude, longitude
            )));
        }

        let forecast_days = self.forecast_days.to_string();
        let latitude = latitude.to_string();
        let longitude = longitude.to_string();
        let current = CURRENT_FIELDS.join(",");
        let hourly = HOURLY_FIELDS.join(",");
        let daily = DAILY_FIELDS.join(",");

        Url::parse_with_params(
            &self.base_url,
            &[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("current", current.as_str()),
                ("hourly", hourly.as_str()),
                ("daily", daily.as_str()),
                ("temperature_unit", "celsius"),
                ("wind_speed_unit", "kmh"),
                ("precipitation_unit", "mm"),
                ("forecast_days", forecast_days.as_str()),
                ("timezone", "auto"),
            ],
        )
        .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", self.base_url, e)))
    }

    /// Fetch with an explicit retry state; the state is reset on success.
    async fn fetch_with_state(
        &self,
        url: &Url,
        state: &mut RetryState,
    ) -> Result<Forecast, FetchError> {
        loop {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();

            if status == StatusCode::OK {
                let body = response.bytes().await?;
                let decoded: ForecastResponse = serde_json::from_slice(&body)
                    .map_err(|e| FetchError::DecodeError(e.to_string()))?;
                let forecast = decoded.into_forecast(Utc::now())?;

                if state.attempt() > 0 {
                    tracing::info!("Forecast fetched after {} retries", state.attempt());
                }
                state.reset();
                return Ok(forecast);
            }

            if is_retryable_status(status) == RetryDecision::NoRetry {
                tracing::warn!("Forecast request failed with status {}", status);
                return Err(FetchError::NetworkError(status.as_u16()));
            }

            match state.next_delay(&self.policy) {
                Some(delay) => {
                    tracing::warn!(
                        "Forecast returned {}, retry {} of {} in {:?}",
                        status,
                        state.attempt(),
                        self.policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        "Forecast retries exhausted after {} attempts (last status {})",
                        state.attempt(),
                        status
                    );
                    return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                        FetchError::RateLimited
                    } else {
                        FetchError::ServerError(status.as_u16())
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ForecastSource for WeatherProvider {
    #[instrument(skip(self), level = "info")]
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Forecast, FetchError> {
        let url = self.request_url(latitude, longitude)?;
        tracing::debug!("Fetching forecast from {}", url);

        let mut state = RetryState::new();
        self.fetch_with_state(&url, &mut state).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

    fn fast_provider(base_url: &str) -> WeatherProvider {
        WeatherProvider::with_options(base_url, 16, RetryPolicy::new(3, Duration::from_millis(1)), 5)
            .unwrap()
    }

    fn minimal_body() -> serde_json::Value {
        serde_json::json!({
            "utc_offset_seconds": 0,
            "current": {
                "time": "2025-06-15T10:00",
                "temperature_2m": 18.0,
                "relative_humidity_2m": 70,
                "apparent_temperature": 17.5,
                "is_day": 1,
                "precipitation": 0.0,
                "weather_code": 3,
                "cloud_cover": 100,
                "wind_speed_10m": 8.0,
                "wind_direction_10m": 180
            },
            "hourly": {
                "time": ["2025-06-15T10:00"],
                "temperature_2m": [18.0],
                "relative_humidity_2m": [70],
                "apparent_temperature": [17.5],
                "precipitation_probability": [20],
                "weather_code": [3],
                "cloud_cover": [100],
                "wind_speed_10m": [8.0]
            },
            "daily": {
                "time": ["2025-06-15"],
                "weather_code": [3],
                "temperature_2m_max": [20.0],
                "temperature_2m_min": [12.0],
                "precipitation_sum": [0.0],
                "wind_speed_10m_max": [15.0],
                "precipitation_probability_max": [20],
                "sunrise": ["2025-06-15T04:43"],
                "sunset": ["2025-06-15T21:31"]
            }
        })
    }

    #[test]
    fn test_request_url_contains_all_parameters() {
        let provider = fast_provider(OPEN_METEO_URL);
        let url = provider.request_url(52.52, 13.41).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(query["latitude"], "52.52");
        assert_eq!(query["longitude"], "13.41");
        assert_eq!(query["forecast_days"], "16");
        assert_eq!(query["timezone"], "auto");
        assert_eq!(query["temperature_unit"], "celsius");
        assert!(query["hourly"].contains("precipitation_probability"));
        assert!(query["daily"].contains("sunrise"));
        assert!(query["current"].contains("is_day"));
    }

    #[test]
    fn test_malformed_base_url_is_invalid_request() {
        let provider = fast_provider("not a url");
        let err = provider.request_url(1.0, 2.0).unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[test]
    fn test_non_finite_coordinates_are_invalid_request() {
        let provider = fast_provider(OPEN_METEO_URL);
        assert!(matches!(
            provider.request_url(f64::NAN, 2.0),
            Err(FetchError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_success_resets_retry_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(minimal_body()))
            .mount(&server)
            .await;

        let provider = fast_provider(&format!("{}/v1/forecast", server.uri()));
        let url = provider.request_url(52.52, 13.41).unwrap();
        let mut state = RetryState::new();

        let forecast = provider.fetch_with_state(&url, &mut state).await.unwrap();

        assert_eq!(forecast.hourly.len(), 1);
        assert_eq!(state.attempt(), 0);
    }
}
