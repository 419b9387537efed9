//! Refresh orchestrator.
//!
//! One run: reschedule, then locate → fetch → detect → summarize → suggest
//! → notify, checking the cancellation token between stages. At most one
//! run executes at a time; a trigger that arrives while a run is in flight
//! is skipped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nimbus_core::{Classify, FailureClass, NotificationConfig, RefreshConfig};
use nimbus_services::notify::{
    Notifier, UserInfo, DAILY_FORECAST_REQUEST_ID, WEATHER_ALERT_CATEGORY,
};
use nimbus_services::TextGenerator;
use nimbus_weather::{ForecastSource, Location, LocationProvider};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::detector::{Detection, Detector, ScheduledAlert};
use crate::host::RefreshHost;
use crate::run_state::RunState;
use crate::summary::{build_summary, daily_forecast_text, SummaryOutcome};

pub const SUGGESTION_TITLE: &str = "Daily Weather Tip";
pub const SUGGESTION_DELAY: Duration = Duration::from_secs(5);

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Locate,
    Fetch,
    Detect,
    Summarize,
    Suggest,
    Notify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Locate => "locate",
            Stage::Fetch => "fetch",
            Stage::Detect => "detect",
            Stage::Summarize => "summarize",
            Stage::Suggest => "suggest",
            Stage::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub location: Option<Location>,
    pub alert: Option<ScheduledAlert>,
    pub summary_available: bool,
    pub suggestion: Option<String>,
    pub suggestion_id: Option<String>,
    /// Problems that dropped part of the run without ending it.
    pub issues: Vec<StageIssue>,
}

impl RunReport {
    fn note(&mut self, stage: Stage, class: FailureClass, message: impl Into<String>) {
        let message = message.into();
        if class.is_failure() {
            tracing::warn!("{} stage dropped its result ({:?}): {}", stage, class, message);
        } else {
            tracing::info!("{} stage had nothing to do: {}", stage, message);
        }
        self.issues.push(StageIssue {
            stage,
            class,
            message,
        });
    }

    /// Issues of the given class, in stage order.
    pub fn issues_of(&self, class: FailureClass) -> impl Iterator<Item = &StageIssue> {
        self.issues.iter().filter(move |issue| issue.class == class)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageIssue {
    pub stage: Stage,
    pub class: FailureClass,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub stage: Stage,
    pub class: FailureClass,
    pub message: String,
}

impl RunFailure {
    fn new<E>(stage: Stage, error: &E) -> Self
    where
        E: Classify + fmt::Display,
    {
        Self {
            stage,
            class: error.class(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Stopped at the checkpoint following `after`.
    Cancelled { after: Stage },
    Failed(RunFailure),
    /// Another run was already in flight.
    Skipped,
}

impl RunOutcome {
    /// Value reported to the host's completion mechanism.
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Delay requested from the host at the start of every run.
    pub refresh_interval: Duration,
    /// `(hour, minute)` of the daily forecast notification, if enabled.
    pub daily_forecast_at: Option<(u32, u32)>,
}

impl OrchestratorSettings {
    pub fn from_config(refresh: &RefreshConfig, notifications: &NotificationConfig) -> Self {
        Self {
            refresh_interval: refresh.background_interval(),
            daily_forecast_at: notifications
                .daily_forecast
                .then_some((notifications.daily_hour, notifications.daily_minute)),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&RefreshConfig::default(), &NotificationConfig::default())
    }
}

/// Everything a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub location: Arc<dyn LocationProvider>,
    pub forecast: Arc<dyn ForecastSource>,
    pub detector: Arc<dyn Detector>,
    pub text: Arc<dyn TextGenerator>,
    pub notifier: Arc<dyn Notifier>,
    pub host: Arc<dyn RefreshHost>,
}

pub struct RefreshOrchestrator {
    deps: Collaborators,
    settings: OrchestratorSettings,
    state: Mutex<RunState>,
}

/// Holds the single-flight slot for one run.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl<'a> RunGuard<'a> {
    fn try_begin(state: &'a Mutex<RunState>) -> Option<Self> {
        let mut current = state.lock();
        if !current.can_start() {
            return None;
        }
        *current = RunState::Running;
        Some(Self { state })
    }

    fn finish(self, outcome: &RunOutcome) {
        let mut current = self.state.lock();
        *current = match outcome {
            RunOutcome::Completed(_) => current.on_completed(),
            RunOutcome::Cancelled { .. } => current.on_cancelled(),
            RunOutcome::Failed(_) => current.on_failed(),
            RunOutcome::Skipped => current.on_abandoned(),
        };
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut current = self.state.lock();
        *current = current.on_abandoned();
    }
}

/// Early exit from the pipeline.
enum Halt {
    Cancelled(Stage),
    Failed(RunFailure),
}

fn checkpoint(token: &CancellationToken, after: Stage) -> Result<(), Halt> {
    if token.is_cancelled() {
        return Err(Halt::Cancelled(after));
    }
    Ok(())
}

impl RefreshOrchestrator {
    pub fn new(deps: Collaborators, settings: OrchestratorSettings) -> Self {
        Self {
            deps,
            settings,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Execute one run and report completion to the host.
    #[tracing::instrument(skip(self, token), level = "info")]
    pub async fn run(&self, token: &CancellationToken) -> RunOutcome {
        let Some(guard) = RunGuard::try_begin(&self.state) else {
            tracing::info!("Refresh already running, trigger skipped");
            self.deps.host.complete(false);
            return RunOutcome::Skipped;
        };

        if let Err(e) = self.deps.host.schedule_next(self.settings.refresh_interval) {
            tracing::warn!("Could not schedule next refresh: {}", e);
        }

        let outcome = match self.pipeline(token).await {
            Ok(report) => RunOutcome::Completed(report),
            Err(Halt::Cancelled(after)) => RunOutcome::Cancelled { after },
            Err(Halt::Failed(failure)) => RunOutcome::Failed(failure),
        };

        match &outcome {
            RunOutcome::Completed(report) => tracing::info!(
                "Refresh completed (alert: {}, suggestion: {})",
                report.alert.is_some(),
                report.suggestion.is_some()
            ),
            RunOutcome::Cancelled { after } => {
                tracing::warn!("Refresh cancelled after {} stage", after)
            }
            RunOutcome::Failed(failure) if failure.class.is_retryable() => tracing::warn!(
                "Refresh failed at {} stage, next scheduled run will try again: {}",
                failure.stage,
                failure.message
            ),
            RunOutcome::Failed(failure) => tracing::error!(
                "Refresh failed at {} stage ({:?}): {}",
                failure.stage,
                failure.class,
                failure.message
            ),
            RunOutcome::Skipped => {}
        }

        guard.finish(&outcome);
        self.deps.host.complete(outcome.is_success());
        outcome
    }

    /// Run under a deadline: the token is cancelled once `budget` elapses
    /// or when `parent` is cancelled, whichever comes first.
    pub async fn run_with_budget(&self, parent: &CancellationToken, budget: Duration) -> RunOutcome {
        let token = parent.child_token();
        let deadline = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                tracing::warn!("Refresh budget of {}s expired", budget.as_secs());
                token.cancel();
            })
        };

        let outcome = self.run(&token).await;
        deadline.abort();
        outcome
    }

    async fn pipeline(&self, token: &CancellationToken) -> Result<RunReport, Halt> {
        let mut report = RunReport::default();

        let location = self
            .deps
            .location
            .current_location()
            .await
            .map_err(|e| Halt::Failed(RunFailure::new(Stage::Locate, &e)))?;
        let locality = location.locality.clone();
        report.location = Some(location.clone());
        checkpoint(token, Stage::Locate)?;

        let forecast = self
            .deps
            .forecast
            .fetch(location.latitude, location.longitude)
            .await
            .map_err(|e| Halt::Failed(RunFailure::new(Stage::Fetch, &e)))?;
        tracing::debug!("Fetched {} hourly samples", forecast.hourly.len());
        checkpoint(token, Stage::Fetch)?;

        match self
            .deps
            .detector
            .detect(&forecast.hourly, locality.as_deref())
            .await
        {
            Ok(Detection::Scheduled(alert)) => report.alert = Some(alert),
            Ok(Detection::Nothing(reason)) if reason.is_missing_data() => {
                report.note(Stage::Detect, FailureClass::MissingData, format!("{:?}", reason))
            }
            Ok(Detection::Nothing(_)) => {}
            Err(e) => report.note(Stage::Detect, e.class(), e.to_string()),
        }
        checkpoint(token, Stage::Detect)?;

        let summary = build_summary(&forecast, locality.as_deref(), Utc::now());
        report.summary_available = summary.is_available();
        if !summary.is_available() {
            report.note(Stage::Summarize, FailureClass::MissingData, summary.text());
        }
        self.refresh_daily_forecast(&forecast.daily, &mut report).await;
        checkpoint(token, Stage::Summarize)?;

        let SummaryOutcome::Available(summary) = summary else {
            return Ok(report);
        };

        let suggestion = self
            .deps
            .text
            .suggest_activity(&summary)
            .await
            .map_err(|e| Halt::Failed(RunFailure::new(Stage::Suggest, &e)))?;
        checkpoint(token, Stage::Suggest)?;

        let id = self
            .deps
            .notifier
            .schedule(
                SUGGESTION_TITLE,
                &suggestion,
                SUGGESTION_DELAY,
                WEATHER_ALERT_CATEGORY,
                UserInfo::new(),
            )
            .await
            .map_err(|e| Halt::Failed(RunFailure::new(Stage::Notify, &e)))?;

        report.suggestion = Some(suggestion);
        report.suggestion_id = Some(id);
        Ok(report)
    }

    async fn refresh_daily_forecast(
        &self,
        daily: &nimbus_weather::DailySummary,
        report: &mut RunReport,
    ) {
        let Some((hour, minute)) = self.settings.daily_forecast_at else {
            return;
        };
        let Some((title, body)) = daily_forecast_text(daily) else {
            tracing::debug!("Today's forecast incomplete, daily notification unchanged");
            return;
        };

        if let Err(e) = self
            .deps
            .notifier
            .schedule_daily(&title, &body, hour, minute, DAILY_FORECAST_REQUEST_ID)
            .await
        {
            report.note(
                Stage::Summarize,
                e.class(),
                format!("Could not schedule daily forecast: {}", e),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_completed_is_success() {
        assert!(RunOutcome::Completed(RunReport::default()).is_success());
        assert!(!RunOutcome::Skipped.is_success());
        assert!(!RunOutcome::Cancelled {
            after: Stage::Fetch
        }
        .is_success());
        assert!(!RunOutcome::Failed(RunFailure {
            stage: Stage::Fetch,
            class: FailureClass::TransientServer,
            message: "busy".to_string(),
        })
        .is_success());
    }

    #[test]
    fn test_guard_is_exclusive_and_releases() {
        let state = Mutex::new(RunState::Idle);

        let guard = RunGuard::try_begin(&state);
        assert!(guard.is_some());
        assert!(RunGuard::try_begin(&state).is_none());

        if let Some(guard) = guard {
            guard.finish(&RunOutcome::Cancelled {
                after: Stage::Detect,
            });
        }
        assert_eq!(*state.lock(), RunState::Cancelled);
        assert!(RunGuard::try_begin(&state).is_some());
    }

    #[test]
    fn test_dropped_guard_returns_to_idle() {
        let state = Mutex::new(RunState::Idle);
        drop(RunGuard::try_begin(&state));
        assert_eq!(*state.lock(), RunState::Idle);
    }

    #[test]
    fn test_checkpoint() {
        let token = CancellationToken::new();
        assert!(checkpoint(&token, Stage::Fetch).is_ok());
        token.cancel();
        assert!(matches!(
            checkpoint(&token, Stage::Fetch),
            Err(Halt::Cancelled(Stage::Fetch))
        ));
    }

    #[test]
    fn test_settings_from_config() {
        let mut notifications = NotificationConfig::default();
        let settings = OrchestratorSettings::from_config(&RefreshConfig::default(), &notifications);
        assert_eq!(settings.refresh_interval, Duration::from_secs(8 * 3600));
        assert_eq!(settings.daily_forecast_at, Some((7, 0)));

        notifications.daily_forecast = false;
        let settings = OrchestratorSettings::from_config(&RefreshConfig::default(), &notifications);
        assert_eq!(settings.daily_forecast_at, None);
    }
}
