//! Retry utilities for HTTP operations with exponential backoff.
//!
//! Retried:
//! - 429 Too Many Requests
//! - 5xx server errors
//!
//! Everything else is surfaced on the first response. Retry state is a
//! plain value owned by one logical operation; two concurrent operations
//! never share a counter.

use std::time::Duration;

use reqwest::StatusCode;

/// Default retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_SECS: u64 = 1;

/// Backoff policy: attempt `n` (starting at 1) waits `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first request
    pub max_retries: u32,
    /// Unit the exponential factor is applied to
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(DEFAULT_BASE_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Calculate the delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

/// Attempt counter for a single logical operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries performed so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Consume one retry, returning how long to wait before it.
    ///
    /// Returns `None` once the policy's budget is spent.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if self.attempt >= policy.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(policy.delay_for_attempt(self.attempt))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure or success
    NoRetry,
}

/// Check if a status code is retryable
pub fn is_retryable_status(status: StatusCode) -> RetryDecision {
    if status.is_server_error() {
        tracing::debug!("Server error ({}), will retry", status);
        return RetryDecision::Retry;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::debug!("Rate limited (429), will retry");
        return RetryDecision::Retry;
    }

    RetryDecision::NoRetry
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_schedule_is_two_four_eight() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_state_never_exceeds_max_retries() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();

        let delays: Vec<Duration> = std::iter::from_fn(|| state.next_delay(&policy)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(state.attempt(), 3);
        assert_eq!(state.next_delay(&policy), None);
        assert_eq!(state.attempt(), 3);
    }

    #[test]
    fn test_reset_restores_full_budget() {
        let policy = RetryPolicy::new(1, Duration::from_millis(10));
        let mut state = RetryState::new();

        assert!(state.next_delay(&policy).is_some());
        assert!(state.next_delay(&policy).is_none());

        state.reset();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.next_delay(&policy), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_zero_retries_never_waits() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(RetryState::new().next_delay(&policy), None);
    }

    #[test]
    fn test_retryable_status_codes() {
        assert_eq!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR), RetryDecision::Retry);
        assert_eq!(is_retryable_status(StatusCode::BAD_GATEWAY), RetryDecision::Retry);
        assert_eq!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE), RetryDecision::Retry);
        assert_eq!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS), RetryDecision::Retry);

        assert_eq!(is_retryable_status(StatusCode::REQUEST_TIMEOUT), RetryDecision::NoRetry);
        assert_eq!(is_retryable_status(StatusCode::BAD_REQUEST), RetryDecision::NoRetry);
        assert_eq!(is_retryable_status(StatusCode::NOT_FOUND), RetryDecision::NoRetry);
        assert_eq!(is_retryable_status(StatusCode::OK), RetryDecision::NoRetry);
    }
}
