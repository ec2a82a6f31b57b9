//! Retry/backoff policy for idempotent upstream reads.
//!
//! Transport failures and 5xx responses are retried; 429 and every other
//! status surface at once. Retry `n` (1-based) waits `base * 2^n`, or
//! exactly the provider's `retry-after` when one was sent.

use std::time::Duration;

use common::config::RetryConfig;
use common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Whether a failure class is worth another attempt at all.
    pub fn is_retryable(err: &Error) -> bool {
        match err {
            Error::Http(_) => true,
            Error::Upstream { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Exponential delay for the `retry`-th retry.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Decide what to do about `err` before making retry number `retry`.
    pub fn decide(&self, retry: u32, err: &Error) -> RetryDecision {
        if retry > self.max_retries || !Self::is_retryable(err) {
            return RetryDecision::GiveUp;
        }

        let delay = err
            .retry_after_ms()
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.backoff(retry));
        RetryDecision::RetryAfter(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
