//! Weather data for Nimbus
//!
//! Forecast model, WMO code mapping and a retrying Open-Meteo fetcher.

pub mod codes;
pub mod location;
pub mod provider;
pub mod time;
pub mod types;

pub use codes::{compass_point, describe, WeatherCondition};
pub use location::{LocationProvider, StaticLocation};
pub use provider::{ForecastSource, WeatherProvider};
pub use types::*;
