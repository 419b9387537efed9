//! Refresh run state machine.
//!
//! Ensures only one refresh runs at a time. Terminal states behave like
//! `Idle` for the next trigger and record how the previous run ended.

/// Lifecycle of an orchestrated refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    /// True if a new run can be started.
    pub fn can_start(self) -> bool {
        !matches!(self, RunState::Running)
    }

    /// State after the pipeline finished.
    pub fn on_completed(self) -> Self {
        RunState::Completed
    }

    /// State after a cancellation checkpoint tripped.
    pub fn on_cancelled(self) -> Self {
        RunState::Cancelled
    }

    /// State after a stage failed.
    pub fn on_failed(self) -> Self {
        RunState::Failed
    }

    /// State when a run was abandoned without reaching a terminal state.
    pub fn on_abandoned(self) -> Self {
        match self {
            RunState::Running => RunState::Idle,
            other => other,
        }
    }
}
