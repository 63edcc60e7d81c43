//! Bounded retry for export calls.
//!
//! # Design Decisions
//! - Only transport-level failures (`InternalFailure`) are retried; a
//!   shut-down exporter or an SDK timeout ends the attempt loop
//! - Jittered backoff between attempts, slept on the export thread
//! - Once the pipeline is closing, a failed batch is dropped at once so
//!   shutdown is never held up by backoff
//! - After the last attempt the batch is dropped and counted

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkError;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::export_backoff;

/// How an exporter call is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Attempt tracker for one batch.
    pub fn attempts<'a>(&'a self, signal: &'static str, closing: &'a AtomicBool) -> Attempts<'a> {
        Attempts {
            policy: self,
            signal,
            closing,
            attempt: 0,
        }
    }
}

/// Whether an attempt may be repeated after `err`.
pub fn is_retryable(err: &OTelSdkError) -> bool {
    matches!(err, OTelSdkError::InternalFailure(_))
}

/// Low-cardinality label for the failure self-metric.
pub fn error_kind(err: &OTelSdkError) -> &'static str {
    match err {
        OTelSdkError::AlreadyShutdown => "shutdown",
        OTelSdkError::Timeout(_) => "timeout",
        OTelSdkError::InternalFailure(_) => "transport",
    }
}

/// Failed-attempt accounting for one batch.
pub struct Attempts<'a> {
    policy: &'a RetryPolicy,
    signal: &'static str,
    closing: &'a AtomicBool,
    attempt: u32,
}

impl Attempts<'_> {
    /// Records a failed attempt and waits out the backoff. Returns `false`
    /// when the batch should be given up.
    pub fn retry_after(&mut self, err: &OTelSdkError) -> bool {
        self.attempt += 1;
        metrics::record_export_failure(self.signal, error_kind(err));

        let closing = self.closing.load(Ordering::Acquire);
        if closing || !is_retryable(err) || self.attempt >= self.policy.max_attempts {
            metrics::record_batch_dropped(self.signal);
            tracing::warn!(
                signal = self.signal,
                attempts = self.attempt,
                closing,
                error = %err,
                "Dropping batch after failed export"
            );
            return false;
        }

        let delay = export_backoff(self.attempt, self.policy.base_delay, self.policy.max_delay);
        tracing::debug!(
            signal = self.signal,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying export"
        );
        thread::sleep(delay);
        true
    }

    /// Failed attempts so far.
    pub fn count(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn unavailable() -> OTelSdkError {
        OTelSdkError::InternalFailure("503 Service Unavailable".into())
    }

    #[test]
    fn test_transport_errors_retried_until_max_attempts() {
        let policy = policy(3);
        let closing = AtomicBool::new(false);
        let mut attempts = policy.attempts("metrics", &closing);

        assert!(attempts.retry_after(&unavailable()));
        assert!(attempts.retry_after(&unavailable()));
        assert!(!attempts.retry_after(&unavailable()));
        assert_eq!(attempts.count(), 3);
    }

    #[test]
    fn test_terminal_errors_not_retried() {
        let policy = policy(5);
        let closing = AtomicBool::new(false);

        let mut attempts = policy.attempts("traces", &closing);
        assert!(!attempts.retry_after(&OTelSdkError::AlreadyShutdown));

        let mut attempts = policy.attempts("traces", &closing);
        assert!(!attempts.retry_after(&OTelSdkError::Timeout(Duration::from_secs(1))));
    }

    #[test]
    fn test_closing_pipeline_drops_immediately() {
        let policy = policy(5);
        let closing = AtomicBool::new(true);
        let mut attempts = policy.attempts("traces", &closing);
        assert!(!attempts.retry_after(&unavailable()));
        assert_eq!(attempts.count(), 1);
    }

    #[test]
    fn test_zero_attempts_config_means_one() {
        let config = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
