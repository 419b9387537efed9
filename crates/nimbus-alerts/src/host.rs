//! Refresh host interface.
//!
//! The host owns the platform side of background refresh: it accepts the
//! next requested run time and learns when a run has released its budget.

use std::time::Duration;

use nimbus_core::{Classify, FailureClass};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Refresh host is no longer accepting requests")]
    Closed,

    #[error("Could not schedule refresh: {0}")]
    Rejected(String),
}

impl Classify for HostError {
    fn class(&self) -> FailureClass {
        FailureClass::Collaborator
    }
}

pub trait RefreshHost: Send + Sync {
    /// Request the next refresh no earlier than `after` from now.
    fn schedule_next(&self, after: Duration) -> Result<(), HostError>;

    /// Signal that the current run is over. `success` is true when useful work finished.
    fn complete(&self, success: bool);
}

/// Messages a [`ChannelHost`] forwards to whoever drives the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    ScheduleNext(Duration),
    Completed { success: bool },
}

/// In-process host that forwards requests over a channel.
#[derive(Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RefreshHost for ChannelHost {
    fn schedule_next(&self, after: Duration) -> Result<(), HostError> {
        if after.is_zero() {
            return Err(HostError::Rejected("interval must be non-zero".to_string()));
        }
        self.tx
            .send(HostEvent::ScheduleNext(after))
            .map_err(|_| HostError::Closed)?;
        tracing::debug!("Next refresh requested in {}s", after.as_secs());
        Ok(())
    }

    fn complete(&self, success: bool) {
        if self.tx.send(HostEvent::Completed { success }).is_err() {
            tracing::debug!("Refresh host gone, completion dropped");
        }
    }
}
