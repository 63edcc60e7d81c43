//! Retry and sanitizing layer in front of the transport exporters.
//!
//! The SDK processors call these on their export threads. A batch is
//! retried under the [`RetryPolicy`] and dropped after the last attempt.
//! Before metric data is handed on, values OTLP/JSON cannot carry are
//! fixed up so one bad point cannot sink the whole request:
//! - an overflowed f64 sum is clamped to `±f64::MAX`
//! - NaN sums and non-finite gauge values are dropped
//! - non-finite float attributes are removed

use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::{self, Aggregation, ResourceMetrics};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;

use crate::config;
use crate::resilience::retries::RetryPolicy;
use crate::telemetry::attributes;
use crate::telemetry::metrics::{CollectorState, StateCell};

/// Span exporter with bounded retry.
#[derive(Debug)]
pub struct RetryingSpanExporter<E> {
    inner: E,
    policy: RetryPolicy,
    closing: Arc<AtomicBool>,
}

impl<E: SpanExporter> RetryingSpanExporter<E> {
    pub fn new(inner: E, policy: RetryPolicy, closing: Arc<AtomicBool>) -> Self {
        Self { inner, policy, closing }
    }
}

impl<E: SpanExporter> SpanExporter for RetryingSpanExporter<E> {
    async fn export(&self, mut batch: Vec<SpanData>) -> OTelSdkResult {
        if batch.is_empty() {
            return Ok(());
        }
        for span in &mut batch {
            span.attributes.retain(attributes::is_exportable);
        }

        let mut attempts = self.policy.attempts("traces", &self.closing);
        loop {
            match self.inner.export(batch.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts.retry_after(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn shutdown(&mut self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Metric exporter with sanitizing and bounded retry.
///
/// Owns the reported temporality and moves the collector to `Stopped` once
/// the transport is released.
#[derive(Debug)]
pub struct RetryingMetricExporter<E> {
    inner: E,
    policy: RetryPolicy,
    closing: Arc<AtomicBool>,
    temporality: Temporality,
    state: StateCell,
}

impl<E: PushMetricExporter> RetryingMetricExporter<E> {
    pub(crate) fn new(
        inner: E,
        policy: RetryPolicy,
        closing: Arc<AtomicBool>,
        temporality: config::Temporality,
        state: StateCell,
    ) -> Self {
        let temporality = match temporality {
            config::Temporality::Delta => Temporality::Delta,
            config::Temporality::Cumulative => Temporality::Cumulative,
        };
        Self {
            inner,
            policy,
            closing,
            temporality,
            state,
        }
    }
}

impl<E: PushMetricExporter> PushMetricExporter for RetryingMetricExporter<E> {
    async fn export(&self, metrics: &mut ResourceMetrics) -> OTelSdkResult {
        sanitize(metrics);
        if metrics.scope_metrics.iter().all(|scope| scope.metrics.is_empty()) {
            tracing::trace!("Nothing recorded this interval, skipping export");
            return Ok(());
        }

        let mut attempts = self.policy.attempts("metrics", &self.closing);
        loop {
            match self.inner.export(metrics).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts.retry_after(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        let result = self.inner.shutdown();
        self.state.advance(CollectorState::Stopped);
        tracing::debug!("Metric exporter released");
        result
    }

    fn temporality(&self) -> Temporality {
        self.temporality
    }
}

/// Makes every point representable in OTLP/JSON and drops metrics left
/// without points.
pub(crate) fn sanitize(metrics: &mut ResourceMetrics) {
    for scope in &mut metrics.scope_metrics {
        for metric in &mut scope.metrics {
            let fixed = sanitize_points(Aggregation::as_mut(&mut *metric.data));
            if fixed > 0 {
                tracing::debug!(metric = %metric.name, points = fixed, "Adjusted non-finite metric values");
            }
        }
        scope.metrics.retain(|metric| has_points(Aggregation::as_any(&*metric.data)));
    }
}

fn sanitize_points(aggregation: &mut dyn Any) -> usize {
    let mut fixed = 0;
    if let Some(sum) = aggregation.downcast_mut::<data::Sum<f64>>() {
        let before = sum.data_points.len();
        sum.data_points.retain(|p| !p.value.is_nan());
        fixed += before - sum.data_points.len();
        for point in &mut sum.data_points {
            fixed += usize::from(saturate(&mut point.value));
            point.attributes.retain(attributes::is_exportable);
        }
    } else if let Some(hist) = aggregation.downcast_mut::<data::Histogram<f64>>() {
        let before = hist.data_points.len();
        hist.data_points.retain(|p| !p.sum.is_nan());
        fixed += before - hist.data_points.len();
        for point in &mut hist.data_points {
            fixed += usize::from(saturate(&mut point.sum));
            point.attributes.retain(attributes::is_exportable);
        }
    } else if let Some(gauge) = aggregation.downcast_mut::<data::Gauge<f64>>() {
        let before = gauge.data_points.len();
        gauge.data_points.retain(|p| p.value.is_finite());
        fixed += before - gauge.data_points.len();
        for point in &mut gauge.data_points {
            point.attributes.retain(attributes::is_exportable);
        }
    } else if let Some(sum) = aggregation.downcast_mut::<data::Sum<u64>>() {
        for point in &mut sum.data_points {
            point.attributes.retain(attributes::is_exportable);
        }
    } else if let Some(hist) = aggregation.downcast_mut::<data::Histogram<u64>>() {
        for point in &mut hist.data_points {
            point.attributes.retain(attributes::is_exportable);
        }
    } else if let Some(gauge) = aggregation.downcast_mut::<data::Gauge<u64>>() {
        for point in &mut gauge.data_points {
            point.attributes.retain(attributes::is_exportable);
        }
    }
    fixed
}

/// Clamps an overflowed value to the largest finite one of the same sign.
fn saturate(value: &mut f64) -> bool {
    if value.is_infinite() {
        *value = f64::MAX.copysign(*value);
        return true;
    }
    false
}

fn has_points(aggregation: &dyn Any) -> bool {
    if let Some(sum) = aggregation.downcast_ref::<data::Sum<f64>>() {
        !sum.data_points.is_empty()
    } else if let Some(hist) = aggregation.downcast_ref::<data::Histogram<f64>>() {
        !hist.data_points.is_empty()
    } else if let Some(gauge) = aggregation.downcast_ref::<data::Gauge<f64>>() {
        !gauge.data_points.is_empty()
    } else if let Some(sum) = aggregation.downcast_ref::<data::Sum<u64>>() {
        !sum.data_points.is_empty()
    } else if let Some(hist) = aggregation.downcast_ref::<data::Histogram<u64>>() {
        !hist.data_points.is_empty()
    } else if let Some(gauge) = aggregation.downcast_ref::<data::Gauge<u64>>() {
        !gauge.data_points.is_empty()
    } else {
        true
    }
}
