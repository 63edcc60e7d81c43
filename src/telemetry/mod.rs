//! Telemetry pipeline: traces and metrics pushed to an OTLP collector.
//!
//! # Data Flow
//! ```text
//! startup:
//!     TelemetryConfig → ResourceDescriptor (shared by both pipelines)
//!     → SdkTracerProvider (ParentBased(AlwaysOn), batch span processor)
//!     → PeriodicCollector (SdkMeterProvider + periodic reader)
//!     → each exporter wrapped in the retry layer
//!
//! per request:
//!     Tracer::start(parent cx) → child cx → record_error / set_status
//!     Counter::add, Histogram::record → SDK aggregation
//!
//! shutdown:
//!     span queue drained → final metric collection → transports released,
//!     all under one deadline
//! ```
//!
//! # Design Decisions
//! - No global providers: a [`Telemetry`] value is built at startup and
//!   handed to whatever needs a tracer or meter
//! - The span context travels as an explicit [`opentelemetry::Context`]
//! - Export failures never reach request handling

pub mod attributes;
pub mod error;
pub mod export;
pub mod metrics;
pub mod resource;
pub mod trace;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::InstrumentationScope;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracerProvider, SpanExporter};
use tokio::time::{self, Instant};

pub use error::{CallbackError, ExportError, TelemetryError};
pub use opentelemetry::{Context, KeyValue};
pub use resource::ResourceDescriptor;

use crate::config::TelemetryConfig;
use crate::resilience::retries::RetryPolicy;
use crate::telemetry::export::{otlp, RetryingMetricExporter, RetryingSpanExporter};
use crate::telemetry::metrics::{CollectorState, Meter, PeriodicCollector, StateCell};
use crate::telemetry::trace::Tracer;

/// Both export pipelines, built once and shared through `Arc`.
pub struct Telemetry {
    resource: ResourceDescriptor,
    tracer_provider: SdkTracerProvider,
    collector: PeriodicCollector,
    meter: Meter,
    closing: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

impl Telemetry {
    /// Builds both pipelines with OTLP/HTTP exporters.
    ///
    /// Fails if either transport cannot be constructed; the service must not
    /// start half-instrumented.
    pub fn init(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let (spans, metrics) = otlp::build_exporters(config)?;
        Ok(Self::with_exporters(config, spans, metrics))
    }

    /// Builds both pipelines on caller-supplied transports.
    pub fn with_exporters<S, M>(config: &TelemetryConfig, span_exporter: S, metric_exporter: M) -> Self
    where
        S: SpanExporter + 'static,
        M: PushMetricExporter,
    {
        let resource = ResourceDescriptor::new(config.service_name.clone(), config.resource_labels.clone());
        let closing = Arc::new(AtomicBool::new(false));
        let policy = RetryPolicy::from_config(&config.retry);

        let batch = BatchConfigBuilder::default()
            .with_max_queue_size(config.batch.max_queue_size)
            .with_max_export_batch_size(config.batch.max_export_batch_size)
            .with_scheduled_delay(Duration::from_millis(config.batch.scheduled_delay_ms))
            .build();
        let processor = BatchSpanProcessor::builder(RetryingSpanExporter::new(
            span_exporter,
            policy.clone(),
            closing.clone(),
        ))
        .with_batch_config(batch)
        .build();
        let tracer_provider = SdkTracerProvider::builder()
            .with_span_processor(processor)
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_resource(resource.resource().clone())
            .build();

        let state = StateCell::default();
        let exporter = RetryingMetricExporter::new(
            metric_exporter,
            policy,
            closing.clone(),
            config.temporality,
            state.clone(),
        );
        let collector = PeriodicCollector::start(
            exporter,
            resource.resource().clone(),
            Duration::from_millis(config.export_interval_ms.max(1)),
            state,
        );
        let meter = Meter::new(
            collector.meter(resource.service_name()),
            Duration::from_millis(config.callback_timeout_ms.max(1)),
        );

        tracing::info!(
            service = %resource.service_name(),
            export_interval_ms = config.export_interval_ms,
            temporality = ?config.temporality,
            "Telemetry pipelines started"
        );

        Self {
            resource,
            tracer_provider,
            collector,
            meter,
            closing,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        }
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    pub fn tracer(&self, scope: impl Into<String>) -> Tracer {
        let scope = InstrumentationScope::builder(scope.into()).build();
        Tracer::new(self.tracer_provider.tracer_with_scope(scope))
    }

    /// The meter every instrument of this service is created on.
    pub fn meter(&self) -> Meter {
        self.meter.clone()
    }

    pub fn collector_state(&self) -> CollectorState {
        self.collector.state()
    }

    /// Exports queued spans, then runs an out-of-band metric collection.
    pub async fn force_flush(&self) -> Result<(), ExportError> {
        let provider = self.tracer_provider.clone();
        let traces = blocking_until("traces", None, move || provider.force_flush()).await;
        let metrics = self.collector.force_flush().await;
        traces.and(metrics)
    }

    /// Drains both pipelines and releases the transports.
    ///
    /// Both share one deadline of `shutdown_timeout`. Spans go first so that
    /// a request finishing during shutdown has its span exported before its
    /// metrics. Failed batches are no longer retried once this starts.
    pub async fn shutdown(&self) -> Result<(), ExportError> {
        self.closing.store(true, Ordering::Release);
        let budget = self.shutdown_timeout;
        let deadline = Instant::now() + budget;

        let provider = self.tracer_provider.clone();
        let traces = blocking_until("traces", Some((deadline, budget)), move || provider.shutdown()).await;
        if let Err(e) = &traces {
            tracing::warn!(error = %e, "Trace pipeline shutdown incomplete");
        }
        let metrics = self.collector.shutdown(deadline, budget).await;
        if let Err(e) = &metrics {
            tracing::warn!(error = %e, "Metrics pipeline shutdown incomplete");
        }
        tracing::info!(collector = ?self.collector.state(), "Telemetry pipelines stopped");
        traces.and(metrics)
    }
}

/// Runs a blocking SDK call off the async threads and waits for it, giving
/// up at the deadline if one is set. An abandoned call keeps running to
/// completion in the background.
pub(crate) async fn blocking_until<F>(
    signal: &'static str,
    deadline: Option<(Instant, Duration)>,
    call: F,
) -> Result<(), ExportError>
where
    F: FnOnce() -> OTelSdkResult + Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);
    let joined = match deadline {
        Some((deadline, budget)) => match time::timeout_at(deadline, task).await {
            Ok(joined) => joined,
            Err(_) => return Err(ExportError::Timeout { signal, timeout: budget }),
        },
        None => task.await,
    };
    match joined {
        Ok(result) => result.map_err(|e| ExportError::from_sdk(signal, e)),
        Err(e) => Err(ExportError::Pipeline {
            signal,
            reason: e.to_string(),
        }),
    }
}
