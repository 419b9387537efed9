//! Plain-text weather summaries.
//!
//! The summary feeds the activity-suggestion prompt; the daily forecast
//! text feeds the recurring morning notification.

use chrono::{DateTime, FixedOffset, Utc};
use nimbus_weather::time::current_hour_index;
use nimbus_weather::{compass_point, describe, DailySummary, Forecast};

/// Text used wherever a summary cannot be built.
pub const UNAVAILABLE: &str = "Weather data is not currently available.";

pub const DAILY_FORECAST_TITLE: &str = "Today's Forecast";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Available(String),
    Unavailable,
}

impl SummaryOutcome {
    pub fn text(&self) -> &str {
        match self {
            SummaryOutcome::Available(text) => text,
            SummaryOutcome::Unavailable => UNAVAILABLE,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SummaryOutcome::Available(_))
    }
}

fn round(value: f64) -> i64 {
    value.round() as i64
}

/// Build the multi-line summary of current conditions and today's range.
///
/// Unavailable when today's high or low is missing.
pub fn build_summary(forecast: &Forecast, locality: Option<&str>, now: DateTime<Utc>) -> SummaryOutcome {
    let Some((high, low)) = forecast.daily.today_range() else {
        tracing::debug!("Today's high/low missing, summary unavailable");
        return SummaryOutcome::Unavailable;
    };

    let current = &forecast.current;
    let place = locality
        .filter(|name| !name.trim().is_empty())
        .unwrap_or("your area");
    let local_now = FixedOffset::east_opt(forecast.utc_offset_seconds)
        .map(|offset| now.with_timezone(&offset))
        .unwrap_or_else(|| now.fixed_offset());

    let mut lines = vec![
        format!(
            "Here is a summary of the current weather in {} as of {}:",
            place,
            local_now.format("%a, %b %-d, %-I:%M %p")
        ),
        format!("- Overall Condition: {}", describe(current.weather_code)),
        format!("- Current Temperature: {}°C", round(current.temperature)),
        format!("- Feels Like: {}°C", round(current.apparent_temperature)),
        format!(
            "- Today's High/Low: The high for today will be {}°C and the low will be {}°C.",
            round(high),
            round(low)
        ),
        format!(
            "- Precipitation: Current precipitation is {} mm.",
            current.precipitation
        ),
    ];

    let hourly = &forecast.hourly;
    if !hourly.is_empty() {
        let index = current_hour_index(&hourly.time, hourly.utc_offset_seconds, now);
        if let Some(probability) = hourly.precipitation_probability.get(index).copied().flatten() {
            lines.push(format!(
                "- Chance of Precipitation: {}% for the coming hour.",
                probability
            ));
        }
    }

    lines.push(format!(
        "- Wind: The wind is blowing from the {} at {} km/h.",
        compass_point(current.wind_direction),
        round(current.wind_speed)
    ));
    lines.push(format!(
        "- Cloud Cover: {}% of the sky is covered by clouds.",
        current.cloud_cover
    ));
    lines.push(format!(
        "- Humidity: The relative humidity is {}%.",
        current.humidity
    ));

    SummaryOutcome::Available(lines.join("\n"))
}

/// Title and body for the daily morning notification.
pub fn daily_forecast_text(daily: &DailySummary) -> Option<(String, String)> {
    let high = daily.temperature_max.first().copied().flatten()?;
    let code = daily.weather_code.first().copied().flatten()?;

    let body = format!(
        "Today will be {} with a high of {}°.",
        describe(code).to_lowercase(),
        round(high)
    );
    Some((DAILY_FORECAST_TITLE.to_string(), body))
}
