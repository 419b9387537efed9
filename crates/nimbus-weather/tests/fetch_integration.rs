//! Integration tests for WeatherProvider using wiremock.
//!
//! These tests verify the retry/backoff policy and decode handling against a
//! mock forecast server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::{Duration, Instant};

use nimbus_services::retry::RetryPolicy;
use nimbus_weather::{FetchError, ForecastSource, WeatherProvider};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FORECAST_PATH: &str = "/v1/forecast";

fn provider_for(server: &MockServer, base_delay: Duration) -> WeatherProvider {
    WeatherProvider::with_options(
        &format!("{}{}", server.uri(), FORECAST_PATH),
        16,
        RetryPolicy::new(3, base_delay),
        5,
    )
    .unwrap()
}

/// Helper to build a forecast body with the given hourly probabilities
fn forecast_body(probabilities: &[Option<u8>]) -> serde_json::Value {
    let n = probabilities.len();
    let times: Vec<String> = (0..n).map(|h| format!("2025-06-15T{:02}:00", h)).collect();
    serde_json::json!({
        "latitude": 52.52,
        "longitude": 13.41,
        "utc_offset_seconds": 0,
        "current": {
            "time": "2025-06-15T00:00",
            "temperature_2m": 18.0,
            "relative_humidity_2m": 70,
            "apparent_temperature": 17.5,
            "is_day": 0,
            "precipitation": 0.2,
            "weather_code": 61,
            "cloud_cover": 100,
            "wind_speed_10m": 8.0,
            "wind_direction_10m": 180
        },
        "hourly": {
            "time": times,
            "temperature_2m": vec![Some(18.0); n],
            "relative_humidity_2m": vec![Some(70); n],
            "apparent_temperature": vec![Some(17.5); n],
            "precipitation_probability": probabilities,
            "weather_code": vec![Some(61); n],
            "cloud_cover": vec![Some(100); n],
            "wind_speed_10m": vec![Some(8.0); n]
        },
        "daily": {
            "time": ["2025-06-15"],
            "weather_code": [61],
            "temperature_2m_max": [20.0],
            "temperature_2m_min": [12.0],
            "precipitation_sum": [4.0],
            "wind_speed_10m_max": [15.0],
            "precipitation_probability_max": [60],
            "sunrise": ["2025-06-15T04:43"],
            "sunset": ["2025-06-15T21:31"]
        }
    })
}

#[tokio::test]
async fn test_fetch_success_decodes_all_sections() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .and(query_param("forecast_days", "16"))
        .and(query_param("timezone", "auto"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(forecast_body(&[Some(10), None, Some(60)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));
    let forecast = provider.fetch(52.52, 13.41).await.unwrap();

    assert_eq!(forecast.hourly.len(), 3);
    assert_eq!(forecast.hourly.precipitation_probability[1], None);
    assert_eq!(forecast.daily.today_range(), Some((20.0, 12.0)));
    assert_eq!(forecast.current.weather_code, 61);
}

#[tokio::test]
async fn test_rate_limited_after_three_retries() {
    let server = MockServer::start().await;

    // Initial request plus three retries
    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(4)
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));
    let result = provider.fetch(52.52, 13.41).await;

    assert!(matches!(result, Err(FetchError::RateLimited)), "got {:?}", result);
}

#[tokio::test]
async fn test_server_error_after_three_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(502))
        .expect(4)
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));
    let result = provider.fetch(52.52, 13.41).await;

    assert!(matches!(result, Err(FetchError::ServerError(502))), "got {:?}", result);
}

#[tokio::test]
async fn test_backoff_waits_between_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    // 20ms * (2 + 4 + 8) = 280ms of backoff
    let provider = provider_for(&server, Duration::from_millis(20));
    let started = Instant::now();
    let result = provider.fetch(52.52, 13.41).await;

    assert!(result.is_err());
    assert!(
        started.elapsed() >= Duration::from_millis(280),
        "backoff too short: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_other_status_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));
    let result = provider.fetch(52.52, 13.41).await;

    assert!(matches!(result, Err(FetchError::NetworkError(404))), "got {:?}", result);
}

#[tokio::test]
async fn test_missing_daily_is_decode_error_without_retry() {
    let server = MockServer::start().await;

    let mut body = forecast_body(&[Some(10)]);
    body.as_object_mut().unwrap().remove("daily");

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));
    let result = provider.fetch(52.52, 13.41).await;

    assert!(matches!(result, Err(FetchError::DecodeError(_))), "got {:?}", result);
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(&[Some(5)])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));
    let forecast = provider.fetch(52.52, 13.41).await.unwrap();

    assert_eq!(forecast.hourly.precipitation_probability, vec![Some(5)]);
}

#[tokio::test]
async fn test_each_fetch_gets_its_own_retry_budget() {
    let server = MockServer::start().await;

    // First fetch burns three retries before succeeding
    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(&[Some(5)])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Second fetch sees three more failures and must still succeed
    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(&[Some(7)])))
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));

    let first = provider.fetch(52.52, 13.41).await.unwrap();
    assert_eq!(first.hourly.precipitation_probability, vec![Some(5)]);

    let second = provider.fetch(52.52, 13.41).await.unwrap();
    assert_eq!(second.hourly.precipitation_probability, vec![Some(7)]);
}

#[tokio::test]
async fn test_concurrent_fetches_do_not_share_retry_state() {
    let server = MockServer::start().await;

    // Two concurrent fetches each see two failures: four 429s total
    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(4)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(FORECAST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(&[Some(1)])))
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(1));
    let (a, b) = tokio::join!(provider.fetch(1.0, 2.0), provider.fetch(3.0, 4.0));

    assert!(a.is_ok(), "first fetch failed: {:?}", a);
    assert!(b.is_ok(), "second fetch failed: {:?}", b);
}
