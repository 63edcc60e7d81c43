//! Self-metrics for the telemetry pipeline.
//!
//! The pipeline cannot report its own failures through itself, so export and
//! collection health goes through the `metrics` facade and, when enabled, a
//! Prometheus scrape endpoint.
//!
//! # Metrics
//! - `telemetry_export_failures_total` (counter): failed export attempts by signal
//! - `telemetry_batches_dropped_total` (counter): batches given up on by signal
//! - `telemetry_callback_failures_total` (counter): gauge callbacks that failed, timed out or were skipped
//! - `telemetry_measurements_rejected_total` (counter): invalid measurements by instrument

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

static DESCRIBED: AtomicBool = AtomicBool::new(false);

const EXPORT_FAILURES: &str = "telemetry_export_failures_total";
const BATCHES_DROPPED: &str = "telemetry_batches_dropped_total";
const CALLBACK_FAILURES: &str = "telemetry_callback_failures_total";
const MEASUREMENTS_REJECTED: &str = "telemetry_measurements_rejected_total";

/// Installs the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime, at most once per process.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

fn describe() {
    if DESCRIBED.swap(true, Ordering::SeqCst) {
        return;
    }
    metrics::describe_counter!(EXPORT_FAILURES, Unit::Count, "Failed telemetry export attempts");
    metrics::describe_counter!(BATCHES_DROPPED, Unit::Count, "Telemetry batches dropped after export failure");
    metrics::describe_counter!(CALLBACK_FAILURES, Unit::Count, "Gauge callbacks omitted from a collection");
    metrics::describe_counter!(MEASUREMENTS_REJECTED, Unit::Count, "Measurements rejected as invalid");
}

#[inline]
pub fn record_export_failure(signal: &'static str, kind: &'static str) {
    counter!(EXPORT_FAILURES, "signal" => signal, "error" => kind).increment(1);
}

#[inline]
pub fn record_batch_dropped(signal: &'static str) {
    counter!(BATCHES_DROPPED, "signal" => signal).increment(1);
}

#[inline]
pub fn record_callback_failure(instrument: &str, reason: &'static str) {
    counter!(CALLBACK_FAILURES, "instrument" => instrument.to_string(), "reason" => reason).increment(1);
}

#[inline]
pub fn record_measurement_rejected(instrument: &str) {
    counter!(MEASUREMENTS_REJECTED, "instrument" => instrument.to_string()).increment(1);
}
