//! In-memory exporters for tests and local runs without a collector.
//!
//! Metric batches are snapshotted into plain structs at export time, since
//! the SDK reuses its `ResourceMetrics` buffer between collections.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::metrics::data::{self, Aggregation, ResourceMetrics};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared switches for scripted failures and slow exports.
#[derive(Debug, Default)]
struct Behaviour {
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    shut_down: AtomicBool,
}

impl Behaviour {
    /// Applies the configured delay, then reports whether this call fails.
    /// Runs on the SDK export thread, so the delay blocks it.
    fn before_export(&self) -> OTelSdkResult {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.attempts.fetch_add(1, Ordering::AcqRel);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        let failed = self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(OTelSdkError::InternalFailure("scripted failure".to_string()));
        }
        Ok(())
    }
}

/// Keeps every exported span.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    batches: Arc<AtomicUsize>,
    resource: Arc<Mutex<Option<Resource>>>,
    behaviour: Arc<Behaviour>,
}

impl InMemorySpanExporter {
    /// Every export waits `delay` before completing.
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.behaviour.delay) = Some(delay);
        self
    }

    /// The next `n` exports fail with a transport error. Zero clears it.
    pub fn fail_next(&self, n: usize) {
        self.behaviour.fail_next.store(n, Ordering::Release);
    }

    /// Successful exports so far.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::Acquire)
    }

    /// Export calls so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.behaviour.attempts.load(Ordering::Acquire)
    }

    /// All exported spans, in export order.
    pub fn finished_spans(&self) -> Vec<SpanData> {
        lock(&self.spans).clone()
    }

    /// Resource the pipeline attached to this exporter.
    pub fn resource(&self) -> Option<Resource> {
        lock(&self.resource).clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.behaviour.shut_down.load(Ordering::Acquire)
    }
}

impl SpanExporter for InMemorySpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        self.behaviour.before_export()?;
        lock(&self.spans).extend(batch);
        self.batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn shutdown(&mut self) -> OTelSdkResult {
        self.behaviour.shut_down.store(true, Ordering::Release);
        Ok(())
    }

    fn set_resource(&mut self, resource: &Resource) {
        *lock(&self.resource) = Some(resource.clone());
    }
}

/// One exported metric batch.
#[derive(Debug, Clone)]
pub struct ExportedBatch {
    pub resource: Resource,
    pub metrics: Vec<ExportedMetric>,
}

impl ExportedBatch {
    pub fn metric(&self, name: &str) -> Option<&ExportedMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ExportedMetric {
    pub scope: String,
    pub name: String,
    pub unit: String,
    pub description: String,
    pub points: Vec<ExportedPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedPoint {
    pub attributes: Vec<KeyValue>,
    pub value: PointValue,
}

impl ExportedPoint {
    /// String form of one attribute value.
    pub fn attr(&self, key: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    U64(u64),
    F64(f64),
    Histogram {
        count: u64,
        sum: f64,
        bucket_counts: Vec<u64>,
    },
}

/// Keeps a snapshot of every exported metric batch.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricExporter {
    batches: Arc<Mutex<Vec<ExportedBatch>>>,
    behaviour: Arc<Behaviour>,
}

impl InMemoryMetricExporter {
    /// Every export waits `delay` before completing.
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.behaviour.delay) = Some(delay);
        self
    }

    /// The next `n` exports fail with a transport error. Zero clears it.
    pub fn fail_next(&self, n: usize) {
        self.behaviour.fail_next.store(n, Ordering::Release);
    }

    /// Export calls so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.behaviour.attempts.load(Ordering::Acquire)
    }

    pub fn batches(&self) -> Vec<ExportedBatch> {
        lock(&self.batches).clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.behaviour.shut_down.load(Ordering::Acquire)
    }
}

impl PushMetricExporter for InMemoryMetricExporter {
    async fn export(&self, metrics: &mut ResourceMetrics) -> OTelSdkResult {
        self.behaviour.before_export()?;
        let batch = snapshot(metrics);
        lock(&self.batches).push(batch);
        Ok(())
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.behaviour.shut_down.store(true, Ordering::Release);
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        Temporality::Delta
    }
}

fn snapshot(metrics: &ResourceMetrics) -> ExportedBatch {
    let mut out = Vec::new();
    for scope in &metrics.scope_metrics {
        for metric in &scope.metrics {
            let points = points(Aggregation::as_any(&*metric.data));
            if points.is_empty() {
                continue;
            }
            out.push(ExportedMetric {
                scope: scope.scope.name().to_string(),
                name: metric.name.to_string(),
                unit: metric.unit.to_string(),
                description: metric.description.to_string(),
                points,
            });
        }
    }
    ExportedBatch {
        resource: metrics.resource.clone(),
        metrics: out,
    }
}

fn points(aggregation: &dyn Any) -> Vec<ExportedPoint> {
    fn point(attributes: &[KeyValue], value: PointValue) -> ExportedPoint {
        ExportedPoint {
            attributes: attributes.to_vec(),
            value,
        }
    }

    if let Some(sum) = aggregation.downcast_ref::<data::Sum<u64>>() {
        sum.data_points
            .iter()
            .map(|p| point(&p.attributes, PointValue::U64(p.value)))
            .collect()
    } else if let Some(sum) = aggregation.downcast_ref::<data::Sum<f64>>() {
        sum.data_points
            .iter()
            .map(|p| point(&p.attributes, PointValue::F64(p.value)))
            .collect()
    } else if let Some(gauge) = aggregation.downcast_ref::<data::Gauge<u64>>() {
        gauge
            .data_points
            .iter()
            .map(|p| point(&p.attributes, PointValue::U64(p.value)))
            .collect()
    } else if let Some(gauge) = aggregation.downcast_ref::<data::Gauge<f64>>() {
        gauge
            .data_points
            .iter()
            .map(|p| point(&p.attributes, PointValue::F64(p.value)))
            .collect()
    } else if let Some(hist) = aggregation.downcast_ref::<data::Histogram<u64>>() {
        hist.data_points
            .iter()
            .map(|p| {
                let value = PointValue::Histogram {
                    count: p.count,
                    sum: p.sum as f64,
                    bucket_counts: p.bucket_counts.clone(),
                };
                point(&p.attributes, value)
            })
            .collect()
    } else if let Some(hist) = aggregation.downcast_ref::<data::Histogram<f64>>() {
        hist.data_points
            .iter()
            .map(|p| {
                let value = PointValue::Histogram {
                    count: p.count,
                    sum: p.sum,
                    bucket_counts: p.bucket_counts.clone(),
                };
                point(&p.attributes, value)
            })
            .collect()
    } else {
        Vec::new()
    }
}
