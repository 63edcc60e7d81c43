//! Error types for the telemetry pipeline.
//!
//! [`TelemetryError`] is only raised while building the pipeline. Export and
//! callback failures are absorbed by the background threads and reported
//! through logs and self-metrics; [`ExportError`] reaches a caller only from
//! an explicit flush or shutdown.

use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkError;
use thiserror::Error;

/// Fatal configuration errors raised while building the pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An instrument with this name already exists on the meter.
    #[error("instrument '{0}' is already registered")]
    DuplicateInstrument(String),

    /// Instrument name does not satisfy the naming rules.
    #[error("invalid instrument name '{name}': {reason}")]
    InvalidInstrumentName { name: String, reason: &'static str },

    /// An observable gauge was built without a callback.
    #[error("observable gauge '{0}' has no callback")]
    MissingCallback(String),

    /// Histogram boundaries must be finite and strictly increasing.
    #[error("invalid histogram boundaries for '{0}'")]
    InvalidBoundaries(String),

    /// Collector endpoint is missing or malformed.
    #[error("invalid collector endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The transport client could not be constructed.
    #[error("failed to build {signal} exporter: {reason}")]
    ExporterBuild { signal: &'static str, reason: String },
}

/// Outcome of a flush or shutdown that did not complete.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The pipeline reported a failure, typically the last export attempt.
    #[error("{signal} pipeline failed: {reason}")]
    Pipeline { signal: &'static str, reason: String },

    /// The pipeline did not finish before the deadline.
    #[error("{signal} pipeline did not finish within {timeout:?}")]
    Timeout { signal: &'static str, timeout: Duration },

    /// The pipeline has already been shut down.
    #[error("{0} pipeline is shut down")]
    Shutdown(&'static str),
}

impl ExportError {
    pub(crate) fn from_sdk(signal: &'static str, err: OTelSdkError) -> Self {
        match err {
            OTelSdkError::AlreadyShutdown => ExportError::Shutdown(signal),
            OTelSdkError::Timeout(timeout) => ExportError::Timeout { signal, timeout },
            other => ExportError::Pipeline {
                signal,
                reason: other.to_string(),
            },
        }
    }
}

/// Failure reported by an observable gauge callback.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The callback itself reported a failure.
    #[error("callback failed: {0}")]
    Failed(String),

    /// The callback did not return within its time budget.
    #[error("callback exceeded its {0:?} budget")]
    Timeout(Duration),

    /// An earlier invocation is still running.
    #[error("previous invocation still running")]
    Overlapping,

    /// The callback panicked.
    #[error("callback panicked")]
    Panicked,
}

impl CallbackError {
    pub fn failed(reason: impl Into<String>) -> Self {
        CallbackError::Failed(reason.into())
    }

    /// Short label used for self-metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CallbackError::Failed(_) => "failed",
            CallbackError::Timeout(_) => "timeout",
            CallbackError::Overlapping => "overlap",
            CallbackError::Panicked => "panicked",
        }
    }
}
