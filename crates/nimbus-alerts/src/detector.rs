//! Precipitation alert detection.
//!
//! Scans the hourly series for the first hour whose precipitation
//! probability crosses the threshold, asks the text generator for a
//! `Title|Body` line and schedules a one-shot notification an hour ahead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use nimbus_core::{Classify, FailureClass};
use nimbus_services::notify::{Notifier, NotifyError, UserInfo, WEATHER_ALERT_CATEGORY};
use nimbus_services::{TextGenError, TextGenerator};
use nimbus_weather::time::format_clock;
use nimbus_weather::{describe, ForecastSeries, WeatherCondition};
use thiserror::Error;

/// Probability (percent) that must be strictly exceeded.
pub const PRECIPITATION_THRESHOLD: u8 = 50;
/// Events closer than this are not worth alerting about.
pub const MIN_LEAD_SECS: i64 = 5 * 60;
/// How long before the event the notification should fire.
pub const ALERT_LEAD_SECS: i64 = 60 * 60;
/// Shortest delay ever handed to the notifier.
pub const MIN_NOTIFY_DELAY_SECS: i64 = 5;

/// An hour that qualifies for an alert, with its computed timing.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub index: usize,
    pub event_time: DateTime<FixedOffset>,
    pub precipitation_probability: u8,
    pub weather_code: i32,
    pub temperature: f64,
    pub notify_delay: Duration,
}

/// An alert that was handed to the notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAlert {
    pub notification_id: String,
    pub title: String,
    pub body: String,
    pub notify_delay: Duration,
    pub event_time: DateTime<FixedOffset>,
}

/// Why a detection pass produced nothing. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoAlert {
    BelowThreshold,
    UnparseableTime(String),
    TooSoon { seconds_until_event: i64 },
    MissingFields { index: usize },
    MalformedText(String),
}

impl NoAlert {
    /// The forecast lacked data the detector needed.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, NoAlert::UnparseableTime(_) | NoAlert::MissingFields { .. })
    }
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Scheduled(ScheduledAlert),
    Nothing(NoAlert),
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Alert text generation failed: {0}")]
    TextGeneration(#[from] TextGenError),

    #[error("Alert scheduling failed: {0}")]
    Notification(#[from] NotifyError),
}

impl Classify for DetectError {
    fn class(&self) -> FailureClass {
        match self {
            DetectError::TextGeneration(e) => e.class(),
            DetectError::Notification(e) => e.class(),
        }
    }
}

/// First index whose probability is present and strictly above the threshold.
pub fn first_threshold_crossing(probabilities: &[Option<u8>]) -> Option<usize> {
    probabilities
        .iter()
        .position(|p| matches!(p, Some(v) if *v > PRECIPITATION_THRESHOLD))
}

/// Delay before notifying about an event `seconds_until_event` away.
///
/// `None` when the event is five minutes away or closer.
pub fn notify_delay(seconds_until_event: i64) -> Option<Duration> {
    if seconds_until_event <= MIN_LEAD_SECS {
        return None;
    }
    let secs = (seconds_until_event - ALERT_LEAD_SECS).max(MIN_NOTIFY_DELAY_SECS);
    Some(Duration::from_secs(secs.unsigned_abs()))
}

/// Steps 1-5 of detection: pure, no collaborators involved.
pub fn find_candidate(
    series: &ForecastSeries,
    now: DateTime<Utc>,
) -> Result<AlertCandidate, NoAlert> {
    let index =
        first_threshold_crossing(&series.precipitation_probability).ok_or(NoAlert::BelowThreshold)?;

    let event_time = series.timestamp(index).ok_or_else(|| {
        NoAlert::UnparseableTime(series.time.get(index).cloned().unwrap_or_default())
    })?;

    let seconds_until_event = (event_time.with_timezone(&Utc) - now).num_seconds();
    let notify_delay =
        notify_delay(seconds_until_event).ok_or(NoAlert::TooSoon { seconds_until_event })?;

    let weather_code = series.weather_code.get(index).copied().flatten();
    let temperature = series.temperature.get(index).copied().flatten();
    let (Some(weather_code), Some(temperature)) = (weather_code, temperature) else {
        return Err(NoAlert::MissingFields { index });
    };

    Ok(AlertCandidate {
        index,
        event_time,
        precipitation_probability: series.precipitation_probability[index].unwrap_or_default(),
        weather_code,
        temperature,
        notify_delay,
    })
}

/// Human-readable description passed to the text generator.
pub fn event_description(candidate: &AlertCandidate, locality: Option<&str>) -> String {
    let condition = describe(candidate.weather_code).to_lowercase();
    let place = match locality {
        Some(name) if !name.trim().is_empty() => format!("in {}", name),
        _ => "in your area".to_string(),
    };

    format!(
        "Upcoming weather event {} at around {}: {} with a temperature of {}°C.",
        place,
        format_clock(&candidate.event_time),
        condition,
        candidate.temperature.round() as i64
    )
}

/// Split a `Title|Body` line. Anything other than two non-empty fields is rejected.
pub fn parse_alert_text(text: &str) -> Option<(String, String)> {
    let fields: Vec<&str> = text.trim().split('|').map(str::trim).collect();
    match fields.as_slice() {
        [title, body] if !title.is_empty() && !body.is_empty() => {
            Some((title.to_string(), body.to_string()))
        }
        _ => None,
    }
}

fn alert_user_info(candidate: &AlertCandidate) -> UserInfo {
    let mut info = UserInfo::new();
    info.insert(
        "condition".to_string(),
        WeatherCondition::from_wmo_code(candidate.weather_code)
            .key()
            .to_string(),
    );
    info.insert("event_time".to_string(), candidate.event_time.to_rfc3339());
    info.insert(
        "precipitation_probability".to_string(),
        candidate.precipitation_probability.to_string(),
    );
    info
}

/// Interface the refresh orchestrator uses for the detect stage.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(
        &self,
        series: &ForecastSeries,
        locality: Option<&str>,
    ) -> Result<Detection, DetectError>;
}

pub struct AlertDetector {
    text: Arc<dyn TextGenerator>,
    notifier: Arc<dyn Notifier>,
}

impl AlertDetector {
    pub fn new(text: Arc<dyn TextGenerator>, notifier: Arc<dyn Notifier>) -> Self {
        Self { text, notifier }
    }

    /// Detection against an explicit clock.
    pub async fn detect_at(
        &self,
        series: &ForecastSeries,
        locality: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Detection, DetectError> {
        let candidate = match find_candidate(series, now) {
            Ok(c) => c,
            Err(reason) => {
                match &reason {
                    NoAlert::UnparseableTime(raw) => {
                        tracing::warn!("Could not parse time of weather event: {:?}", raw)
                    }
                    other => tracing::info!("No weather alert to send: {:?}", other),
                }
                return Ok(Detection::Nothing(reason));
            }
        };

        let description = event_description(&candidate, locality);
        tracing::info!("Weather event found: {}", description);

        let response = self.text.alert_text(&description).await?;
        let Some((title, body)) = parse_alert_text(&response) else {
            tracing::debug!("Dropping malformed alert text: {:?}", response);
            return Ok(Detection::Nothing(NoAlert::MalformedText(response)));
        };

        let notification_id = self
            .notifier
            .schedule(
                &title,
                &body,
                candidate.notify_delay,
                WEATHER_ALERT_CATEGORY,
                alert_user_info(&candidate),
            )
            .await?;

        tracing::info!(
            "Weather alert scheduled to fire in {} minutes",
            candidate.notify_delay.as_secs() / 60
        );

        Ok(Detection::Scheduled(ScheduledAlert {
            notification_id,
            title,
            body,
            notify_delay: candidate.notify_delay,
            event_time: candidate.event_time,
        }))
    }
}

#[async_trait]
impl Detector for AlertDetector {
    async fn detect(
        &self,
        series: &ForecastSeries,
        locality: Option<&str>,
    ) -> Result<Detection, DetectError> {
        self.detect_at(series, locality, Utc::now()).await
    }
}
