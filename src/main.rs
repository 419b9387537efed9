use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nimbus_alerts::{
    AlertDetector, ChannelHost, Collaborators, HostEvent, OrchestratorSettings,
    RefreshOrchestrator, RunOutcome,
};
use nimbus_core::{Classify, Config, ConfigError, FailureClass};
use nimbus_services::{GeminiClient, LocalNotifier, RetryPolicy};
use nimbus_weather::{Location, StaticLocation, WeatherProvider};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn build_orchestrator(
    config: &Config,
    notifier: LocalNotifier,
    host: ChannelHost,
) -> Result<RefreshOrchestrator> {
    let policy = RetryPolicy::new(
        config.retry.max_retries,
        Duration::from_secs(config.retry.base_delay_secs),
    );
    let forecast = WeatherProvider::with_options(
        &config.weather.api_url,
        config.weather.forecast_days,
        policy,
        config.weather.timeout_secs,
    )
    .context("Failed to create forecast client")?;

    let text = Arc::new(
        GeminiClient::new(
            &config.llm.api_url,
            &config.llm.model,
            config.llm.resolved_api_key(),
            config.llm.temperature,
            config.llm.max_output_tokens,
        )
        .context("Failed to create text-generation client")?,
    );
    let notifier = Arc::new(notifier);

    let location = StaticLocation::new(Location {
        latitude: config.location.latitude,
        longitude: config.location.longitude,
        locality: config.location.locality.clone(),
    });

    let deps = Collaborators {
        location: Arc::new(location),
        forecast: Arc::new(forecast),
        detector: Arc::new(AlertDetector::new(text.clone(), notifier.clone())),
        text,
        notifier,
        host: Arc::new(host),
    };

    Ok(RefreshOrchestrator::new(
        deps,
        OrchestratorSettings::from_config(&config.refresh, &config.notifications),
    ))
}

fn log_outcome(trigger: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(report) => tracing::info!(
            "{} refresh finished ({} stage(s) lacked data)",
            trigger,
            report.issues_of(FailureClass::MissingData).count()
        ),
        RunOutcome::Skipped => tracing::debug!("{} refresh skipped", trigger),
        RunOutcome::Cancelled { after } => {
            tracing::warn!("{} refresh cancelled after {}", trigger, after)
        }
        RunOutcome::Failed(failure) => tracing::warn!(
            "{} refresh failed: {}",
            trigger,
            failure.class.user_message()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    nimbus_core::init()?;

    let (config, _) = Config::load_validated().inspect_err(|e| {
        if let Some(config_err) = e.downcast_ref::<ConfigError>() {
            tracing::error!(
                "{} ({:?})",
                config_err.user_message(),
                config_err.class()
            );
        }
    })?;
    tracing::info!(
        "Nimbus started for {:.2}, {:.2}",
        config.location.latitude,
        config.location.longitude
    );

    let (notifier, mut delivered) = LocalNotifier::new();
    let (host, mut host_events) = ChannelHost::new();
    let orchestrator = Arc::new(build_orchestrator(&config, notifier.clone(), host)?);

    let shutdown = CancellationToken::new();
    let budget = config.refresh.run_budget();

    let mut foreground = tokio::time::interval(config.refresh.foreground_interval());
    let background = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(background);
    let mut background_armed = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                shutdown.cancel();
                break;
            }
            _ = foreground.tick() => {
                let orchestrator = Arc::clone(&orchestrator);
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    let outcome = orchestrator.run(&token).await;
                    log_outcome("Foreground", &outcome);
                });
            }
            _ = &mut background, if background_armed => {
                background_armed = false;
                let orchestrator = Arc::clone(&orchestrator);
                let parent = shutdown.clone();
                tokio::spawn(async move {
                    let outcome = orchestrator.run_with_budget(&parent, budget).await;
                    log_outcome("Background", &outcome);
                });
            }
            Some(event) = host_events.recv() => match event {
                HostEvent::ScheduleNext(after) => {
                    background.as_mut().reset(Instant::now() + after);
                    background_armed = true;
                }
                HostEvent::Completed { success } => {
                    tracing::debug!("Run released its budget (success: {})", success);
                }
            },
            Some(notification) = delivered.recv() => {
                tracing::info!(
                    "[{}] {}: {}",
                    notification.category,
                    notification.title,
                    notification.body
                );
            }
        }
    }

    notifier.cancel_all();
    Ok(())
}
