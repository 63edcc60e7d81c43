//! Periodic collection and export of metrics.
//!
//! # States
//! - Idle: constructed, reader not yet attached
//! - Running: the periodic reader collects every `export_interval`
//! - Draining: shutdown requested, final collection and export in progress
//! - Stopped: exporter released, no further collections
//!
//! # State Transitions
//! ```text
//! Idle → Running: provider built with the periodic reader
//! Running → Draining: shutdown requested
//! Draining → Stopped: the exporter was shut down
//! ```
//!
//! Transitions only move forward. The reader thread belongs to the SDK; a
//! collection in progress when shutdown arrives finishes first, so a batch
//! reaches the exporter whole or not at all.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Meter as SdkMeter, MeterProvider as _};
use opentelemetry::InstrumentationScope;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use tokio::time::Instant;

use crate::telemetry::blocking_until;
use crate::telemetry::error::ExportError;

const SIGNAL: &str = "metrics";

/// Collector lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CollectorState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl From<u8> for CollectorState {
    fn from(val: u8) -> Self {
        match val {
            1 => CollectorState::Running,
            2 => CollectorState::Draining,
            3 => CollectorState::Stopped,
            _ => CollectorState::Idle,
        }
    }
}

/// State shared between the collector and the exporter it drives.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn get(&self) -> CollectorState {
        CollectorState::from(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn advance(&self, state: CollectorState) {
        self.0.fetch_max(state as u8, Ordering::AcqRel);
    }
}

/// Meter provider driven by the SDK periodic reader.
pub struct PeriodicCollector {
    provider: SdkMeterProvider,
    state: StateCell,
}

impl PeriodicCollector {
    pub(crate) fn start<E>(exporter: E, resource: Resource, interval: Duration, state: StateCell) -> Self
    where
        E: PushMetricExporter,
    {
        let reader = PeriodicReader::builder(exporter).with_interval(interval).build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();
        state.advance(CollectorState::Running);
        tracing::debug!(interval = ?interval, "Metric collector running");
        Self { provider, state }
    }

    pub fn state(&self) -> CollectorState {
        self.state.get()
    }

    pub(crate) fn meter(&self, scope: &str) -> SdkMeter {
        self.provider
            .meter_with_scope(InstrumentationScope::builder(scope.to_string()).build())
    }

    /// Runs one collection out of band and waits for its export.
    pub async fn force_flush(&self) -> Result<(), ExportError> {
        let provider = self.provider.clone();
        blocking_until(SIGNAL, None, move || provider.force_flush()).await
    }

    /// Stops collecting, performs one final export and releases the exporter.
    ///
    /// Returns at `deadline` at the latest. The SDK keeps finishing the
    /// final export in the background and still releases the exporter.
    pub async fn shutdown(&self, deadline: Instant, budget: Duration) -> Result<(), ExportError> {
        self.state.advance(CollectorState::Draining);
        let provider = self.provider.clone();
        blocking_until(SIGNAL, Some((deadline, budget)), move || provider.shutdown()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let state = StateCell::default();
        assert_eq!(state.get(), CollectorState::Idle);
        state.advance(CollectorState::Draining);
        state.advance(CollectorState::Running);
        assert_eq!(state.get(), CollectorState::Draining);
        state.advance(CollectorState::Stopped);
        state.advance(CollectorState::Idle);
        assert_eq!(state.get(), CollectorState::Stopped);
    }
}
