//! Instrument handles and their builders.
//!
//! Each handle wraps the SDK instrument and adds the checks the SDK does not
//! make: negative or non-finite measurements are rejected and counted, and
//! non-finite float attributes are stripped.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use opentelemetry::metrics::{
    AsyncInstrument, Counter as SdkCounter, Histogram as SdkHistogram, Meter as SdkMeter,
    ObservableGauge as SdkObservableGauge,
};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue};

use crate::observability::metrics;
use crate::telemetry::attributes;
use crate::telemetry::error::{CallbackError, TelemetryError};
use crate::telemetry::metrics::gauge::TimedCallback;
use crate::telemetry::metrics::registry::Meter;

/// Name, unit and description shared by every instrument kind.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: String,
    pub unit: String,
    pub description: String,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u64 {}
    impl Sealed for f64 {}
}

/// Implemented for `u64` and `f64`.
pub trait Number: sealed::Sealed + Copy + fmt::Debug + Send + Sync + 'static {
    fn is_finite(self) -> bool;

    fn is_negative(self) -> bool;

    #[doc(hidden)]
    fn sdk_counter(meter: &SdkMeter, d: &Descriptor) -> SdkCounter<Self>;

    #[doc(hidden)]
    fn sdk_histogram(meter: &SdkMeter, d: &Descriptor, boundaries: Option<Vec<f64>>) -> SdkHistogram<Self>;

    #[doc(hidden)]
    fn sdk_gauge<F>(meter: &SdkMeter, d: &Descriptor, callback: F) -> SdkObservableGauge<Self>
    where
        F: Fn(&dyn AsyncInstrument<Self>) + Send + Sync + 'static;
}

impl Number for u64 {
    fn is_finite(self) -> bool {
        true
    }

    fn is_negative(self) -> bool {
        false
    }

    fn sdk_counter(meter: &SdkMeter, d: &Descriptor) -> SdkCounter<u64> {
        meter
            .u64_counter(d.name.clone())
            .with_unit(d.unit.clone())
            .with_description(d.description.clone())
            .build()
    }

    fn sdk_histogram(meter: &SdkMeter, d: &Descriptor, boundaries: Option<Vec<f64>>) -> SdkHistogram<u64> {
        let builder = meter
            .u64_histogram(d.name.clone())
            .with_unit(d.unit.clone())
            .with_description(d.description.clone());
        match boundaries {
            Some(boundaries) => builder.with_boundaries(boundaries).build(),
            None => builder.build(),
        }
    }

    fn sdk_gauge<F>(meter: &SdkMeter, d: &Descriptor, callback: F) -> SdkObservableGauge<u64>
    where
        F: Fn(&dyn AsyncInstrument<u64>) + Send + Sync + 'static,
    {
        meter
            .u64_observable_gauge(d.name.clone())
            .with_unit(d.unit.clone())
            .with_description(d.description.clone())
            .with_callback(callback)
            .build()
    }
}

impl Number for f64 {
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }

    fn is_negative(self) -> bool {
        self < 0.0
    }

    fn sdk_counter(meter: &SdkMeter, d: &Descriptor) -> SdkCounter<f64> {
        meter
            .f64_counter(d.name.clone())
            .with_unit(d.unit.clone())
            .with_description(d.description.clone())
            .build()
    }

    fn sdk_histogram(meter: &SdkMeter, d: &Descriptor, boundaries: Option<Vec<f64>>) -> SdkHistogram<f64> {
        let builder = meter
            .f64_histogram(d.name.clone())
            .with_unit(d.unit.clone())
            .with_description(d.description.clone());
        match boundaries {
            Some(boundaries) => builder.with_boundaries(boundaries).build(),
            None => builder.build(),
        }
    }

    fn sdk_gauge<F>(meter: &SdkMeter, d: &Descriptor, callback: F) -> SdkObservableGauge<f64>
    where
        F: Fn(&dyn AsyncInstrument<f64>) + Send + Sync + 'static,
    {
        meter
            .f64_observable_gauge(d.name.clone())
            .with_unit(d.unit.clone())
            .with_description(d.description.clone())
            .with_callback(callback)
            .build()
    }
}

/// Monotonic sum. Negative and non-finite deltas are rejected.
#[derive(Clone)]
pub struct Counter<T> {
    name: Arc<str>,
    inner: SdkCounter<T>,
}

impl<T> fmt::Debug for Counter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter").field("name", &self.name).finish()
    }
}

impl<T: Number> Counter<T> {
    /// Adds `delta` under `attributes`.
    ///
    /// A negative or non-finite delta is dropped and logged; the running sum
    /// is left untouched.
    pub fn add(&self, cx: &Context, delta: T, attributes: &[KeyValue]) {
        if delta.is_negative() || !delta.is_finite() {
            reject(cx, &self.name, delta, "counter increments must be finite and non-negative");
            return;
        }
        self.inner.add(delta, &attributes::sanitize(attributes));
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Distribution of recorded values over explicit buckets.
#[derive(Clone)]
pub struct Histogram<T> {
    name: Arc<str>,
    inner: SdkHistogram<T>,
}

impl<T> fmt::Debug for Histogram<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram").field("name", &self.name).finish()
    }
}

impl<T: Number> Histogram<T> {
    /// Records one finite value. Non-finite values are dropped and logged.
    pub fn record(&self, cx: &Context, value: T, attributes: &[KeyValue]) {
        if !value.is_finite() {
            reject(cx, &self.name, value, "histogram values must be finite");
            return;
        }
        self.inner.record(value, &attributes::sanitize(attributes));
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle to a registered gauge. The callback lives in the SDK meter and
/// only a collection can invoke it.
pub struct ObservableGauge<T> {
    name: Arc<str>,
    _inner: SdkObservableGauge<T>,
}

impl<T> fmt::Debug for ObservableGauge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableGauge").field("name", &self.name).finish()
    }
}

impl<T> ObservableGauge<T> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Receives a gauge's observations during one callback invocation.
pub struct Observer<T> {
    instrument: Arc<str>,
    points: Vec<(T, Vec<KeyValue>)>,
}

impl<T: Number> Observer<T> {
    pub(crate) fn new(instrument: Arc<str>) -> Self {
        Self {
            instrument,
            points: Vec::new(),
        }
    }

    /// Reports the current value for `attributes`. A later observation for
    /// the same attribute set in the same callback replaces the earlier one.
    pub fn observe(&mut self, value: T, attributes: &[KeyValue]) {
        if !value.is_finite() {
            tracing::warn!(instrument = %self.instrument, value = ?value, "Dropping non-finite gauge observation");
            metrics::record_measurement_rejected(&self.instrument);
            return;
        }
        let attributes = attributes::normalize(attributes);
        match self.points.iter_mut().find(|(_, a)| *a == attributes) {
            Some(slot) => slot.0 = value,
            None => self.points.push((value, attributes)),
        }
    }

    pub(crate) fn into_points(self) -> Vec<(T, Vec<KeyValue>)> {
        self.points
    }
}

pub(crate) type GaugeCallback<T> = Arc<dyn Fn(&mut Observer<T>) -> Result<(), CallbackError> + Send + Sync>;

fn reject<T: Number>(cx: &Context, instrument: &str, value: T, reason: &'static str) {
    let span = cx.span();
    let trace_id = span
        .span_context()
        .is_valid()
        .then(|| span.span_context().trace_id().to_string());
    tracing::warn!(instrument, value = ?value, trace_id = ?trace_id, reason, "Rejected measurement");
    metrics::record_measurement_rejected(instrument);
}

fn valid_boundaries(bounds: &[f64]) -> bool {
    bounds.iter().all(|b| b.is_finite()) && bounds.windows(2).all(|w| w[0] < w[1])
}

/// Builder returned by [`Meter::counter`] and [`Meter::histogram`].
pub struct InstrumentBuilder<'a, I> {
    meter: &'a Meter,
    descriptor: Descriptor,
    boundaries: Option<Vec<f64>>,
    _marker: PhantomData<I>,
}

impl<'a, I> InstrumentBuilder<'a, I> {
    pub(crate) fn new(meter: &'a Meter, name: String) -> Self {
        Self {
            meter,
            descriptor: Descriptor {
                name,
                unit: String::new(),
                description: String::new(),
            },
            boundaries: None,
            _marker: PhantomData,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.descriptor.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }
}

impl<T: Number> InstrumentBuilder<'_, Counter<T>> {
    pub fn build(self) -> Result<Counter<T>, TelemetryError> {
        self.meter.reserve(&self.descriptor.name, "counter")?;
        Ok(Counter {
            name: Arc::from(self.descriptor.name.as_str()),
            inner: T::sdk_counter(self.meter.sdk(), &self.descriptor),
        })
    }
}

impl<T: Number> InstrumentBuilder<'_, Histogram<T>> {
    /// Explicit bucket boundaries; must be finite and strictly increasing.
    /// Without them the default OpenTelemetry boundaries apply.
    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.boundaries = Some(boundaries);
        self
    }

    pub fn build(self) -> Result<Histogram<T>, TelemetryError> {
        if let Some(bounds) = &self.boundaries {
            if !valid_boundaries(bounds) {
                return Err(TelemetryError::InvalidBoundaries(self.descriptor.name));
            }
        }
        self.meter.reserve(&self.descriptor.name, "histogram")?;
        Ok(Histogram {
            name: Arc::from(self.descriptor.name.as_str()),
            inner: T::sdk_histogram(self.meter.sdk(), &self.descriptor, self.boundaries),
        })
    }
}

/// Builder returned by [`Meter::observable_gauge`].
pub struct GaugeBuilder<'a, T> {
    meter: &'a Meter,
    descriptor: Descriptor,
    callback: Option<GaugeCallback<T>>,
}

impl<'a, T: Number> GaugeBuilder<'a, T> {
    pub(crate) fn new(meter: &'a Meter, name: String) -> Self {
        Self {
            meter,
            descriptor: Descriptor {
                name,
                unit: String::new(),
                description: String::new(),
            },
            callback: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.descriptor.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    /// Callback run once per collection, on its own thread and under the
    /// meter's time budget. It must only read current state and report
    /// through the observer.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Observer<T>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<ObservableGauge<T>, TelemetryError> {
        let Some(callback) = self.callback else {
            return Err(TelemetryError::MissingCallback(self.descriptor.name));
        };
        self.meter.reserve(&self.descriptor.name, "observable_gauge")?;

        let name: Arc<str> = Arc::from(self.descriptor.name.as_str());
        let timed = TimedCallback::new(name.clone(), callback, self.meter.callback_timeout());
        let inner = T::sdk_gauge(self.meter.sdk(), &self.descriptor, move |instrument: &dyn AsyncInstrument<T>| {
            timed.observe(instrument)
        });
        Ok(ObservableGauge { name, _inner: inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_keeps_last_value_per_attribute_set() {
        let mut observer = Observer::<f64>::new(Arc::from("queue_depth"));
        observer.observe(1.0, &[KeyValue::new("queue", "a"), KeyValue::new("shard", 1)]);
        observer.observe(2.0, &[KeyValue::new("shard", 1), KeyValue::new("queue", "a")]);
        observer.observe(5.0, &[KeyValue::new("queue", "b")]);
        observer.observe(f64::NAN, &[KeyValue::new("queue", "c")]);

        let points = observer.into_points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].0, 2.0);
        assert_eq!(points[1].0, 5.0);
    }

    #[test]
    fn test_boundary_rules() {
        assert!(valid_boundaries(&[0.0, 5.0, 10.0]));
        assert!(valid_boundaries(&[]));
        assert!(!valid_boundaries(&[1.0, 1.0]));
        assert!(!valid_boundaries(&[1.0, f64::NAN]));
        assert!(!valid_boundaries(&[f64::NEG_INFINITY, 1.0]));
    }
}
