//! Shared failure taxonomy for Nimbus.
//!
//! Every crate keeps its own `thiserror` enum; this module gives them a
//! common classification so the refresh orchestrator can log and report
//! a failed stage without knowing which crate produced it.

use thiserror::Error;

/// Broad failure categories used across the refresh pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Bad URL or missing configuration. Fatal to the current run.
    Config,
    /// 429 or 5xx from a remote service. Retried with backoff, then surfaced.
    TransientServer,
    /// Any other non-success response. Surfaced immediately.
    PermanentRequest,
    /// Payload did not match the expected schema.
    Decode,
    /// Required optional fields absent. Treated as "nothing to do".
    MissingData,
    /// Text-generation, notification or location collaborator failed.
    Collaborator,
}

impl FailureClass {
    /// Whether a fresh attempt of the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::TransientServer)
    }

    /// Whether this class should end a run as a failure.
    ///
    /// Missing data is the expected common case and never fails a run.
    pub fn is_failure(&self) -> bool {
        !matches!(self, FailureClass::MissingData)
    }

    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureClass::Config => "Weather refresh is misconfigured. Check your settings.",
            FailureClass::TransientServer => {
                "The weather service is busy. Please try again later."
            }
            FailureClass::PermanentRequest => "The weather request failed. Please try again.",
            FailureClass::Decode => "Received an unexpected weather response.",
            FailureClass::MissingData => "Weather data is not currently available.",
            FailureClass::Collaborator => "A supporting service is unavailable right now.",
        }
    }
}

/// Implemented by every error type that can end a pipeline stage.
pub trait Classify {
    fn class(&self) -> FailureClass;
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not access configuration file: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Io(_) => "Configuration file could not be read or written.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

impl Classify for ConfigError {
    fn class(&self) -> FailureClass {
        FailureClass::Config
    }
}
