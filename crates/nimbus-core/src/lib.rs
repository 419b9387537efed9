pub mod config;
pub mod error;

pub use config::{
    Config, LlmConfig, LocationConfig, NotificationConfig, RefreshConfig, RetrySettings,
    ValidationResult, WeatherConfig,
};
pub use error::{Classify, ConfigError, FailureClass};

use anyhow::Result;

/// Initialize logging for the process.
///
/// Honors `RUST_LOG`; falls back to `info`.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("Nimbus core initialized");
    Ok(())
}
