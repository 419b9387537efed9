//! Weather alerts and the refresh pipeline for Nimbus
//!
//! Alert detection over the hourly forecast, plain-text summaries, and the
//! orchestrator that sequences a refresh run under a cancellation token.

pub mod detector;
pub mod host;
pub mod orchestrator;
pub mod run_state;
pub mod summary;

pub use detector::{
    AlertCandidate, AlertDetector, DetectError, Detection, Detector, NoAlert, ScheduledAlert,
};
pub use host::{ChannelHost, HostError, HostEvent, RefreshHost};
pub use orchestrator::{
    Collaborators, OrchestratorSettings, RefreshOrchestrator, RunFailure, RunOutcome, RunReport,
    Stage, StageIssue,
};
pub use run_state::RunState;
pub use summary::{build_summary, daily_forecast_text, SummaryOutcome};
