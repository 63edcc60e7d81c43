//! Trace export pipeline.
//!
//! # Data Flow
//! ```text
//! Tracer::start(parent cx) → (child cx, SpanGuard)
//!     → handler annotates through the context (record_error, set_status)
//!     → span ends on every exit path (explicit end or the guard's Drop)
//!     → SDK batch span processor (bounded queue, export thread)
//!     → RetryingSpanExporter → OTLP span exporter
//! ```
//!
//! Spans under a remote parent that was not sampled are created
//! non-recording and never reach the exporter.

pub mod propagation;

use std::borrow::Cow;

use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;

pub use opentelemetry::trace::Status;

use crate::telemetry::attributes;

/// Name of the event appended by [`record_error`].
pub const EXCEPTION_EVENT: &str = "exception";
pub const EXCEPTION_MESSAGE: &str = "exception.message";
pub const ERROR_TYPE: &str = "error.type";

/// Starts spans under an explicit parent context.
#[derive(Clone)]
pub struct Tracer {
    inner: SdkTracer,
}

impl Tracer {
    pub(crate) fn new(inner: SdkTracer) -> Self {
        Self { inner }
    }

    /// Starts an internal span as a child of `parent`'s active span, or as a
    /// new trace root when there is none.
    pub fn start(&self, parent: &Context, name: impl Into<Cow<'static, str>>) -> (Context, SpanGuard) {
        self.start_with_kind(parent, name, SpanKind::Internal)
    }

    /// Starts the span that represents one inbound request.
    pub fn start_server(&self, parent: &Context, name: impl Into<Cow<'static, str>>) -> (Context, SpanGuard) {
        self.start_with_kind(parent, name, SpanKind::Server)
    }

    fn start_with_kind(
        &self,
        parent: &Context,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
    ) -> (Context, SpanGuard) {
        let span = self
            .inner
            .span_builder(name)
            .with_kind(kind)
            .start_with_context(&self.inner, parent);
        let cx = parent.with_span(span);
        (cx.clone(), SpanGuard { cx })
    }
}

/// Owns the end of one span. Ending is idempotent and also happens on drop,
/// so early returns and unwinding still close the span.
#[must_use = "dropping the guard ends the span immediately"]
pub struct SpanGuard {
    cx: Context,
}

impl SpanGuard {
    /// Sets an attribute. Non-finite floats are dropped.
    pub fn set_attribute(&self, kv: KeyValue) {
        if attributes::is_exportable(&kv) {
            self.cx.span().set_attribute(kv);
        }
    }

    pub fn end(self) {
        self.cx.span().end();
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

/// Records `err` on the context's active span.
///
/// The classification attribute is the error's type name. A context without
/// an active span, or whose span has already ended, makes this a no-op.
pub fn record_error<E>(cx: &Context, err: &E)
where
    E: std::error::Error,
{
    record_error_with_type(cx, err, short_type_name::<E>());
}

/// Like [`record_error`] with an explicit classification.
pub fn record_error_with_type<E>(cx: &Context, err: &E, error_type: &str)
where
    E: std::error::Error + ?Sized,
{
    if record_exception(cx, err, error_type) {
        cx.span().set_status(Status::error(err.to_string()));
    }
}

/// Appends the `exception` event without touching the span status, for
/// callers that set their own status message. Returns whether the span was
/// recording.
pub fn record_exception<E>(cx: &Context, err: &E, error_type: &str) -> bool
where
    E: std::error::Error + ?Sized,
{
    let span = cx.span();
    if !span.is_recording() {
        tracing::trace!(error = %err, "No recording span, error not recorded");
        return false;
    }
    span.add_event(
        EXCEPTION_EVENT,
        vec![
            KeyValue::new(EXCEPTION_MESSAGE, err.to_string()),
            KeyValue::new(ERROR_TYPE, error_type.to_string()),
        ],
    );
    true
}

/// Sets the status of the context's active span. An Error status is never
/// downgraded to Unset; no-op without a recording span.
pub fn set_status(cx: &Context, status: Status) {
    let span = cx.span();
    if span.is_recording() {
        span.set_status(status);
    }
}

fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::export::memory::InMemorySpanExporter;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::Value;
    use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, SpanData};

    fn tracer() -> (Tracer, SdkTracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_simple_exporter(exporter.clone())
            .build();
        (Tracer::new(provider.tracer("test")), provider, exporter)
    }

    fn event_attr(span: &SpanData, key: &str) -> Option<Value> {
        span.events
            .events
            .iter()
            .find(|e| e.name == EXCEPTION_EVENT)?
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }

    #[test]
    fn test_record_error_without_span_is_noop() {
        let err = std::io::Error::other("boom");
        record_error(&Context::new(), &err);
        set_status(&Context::new(), Status::error("ignored"));
    }

    #[test]
    fn test_record_error_marks_span() {
        let (tracer, _provider, exporter) = tracer();
        let (cx, span) = tracer.start(&Context::new(), "op");

        let err = std::io::Error::other("disk on fire");
        record_error(&cx, &err);
        span.end();

        let finished = exporter.finished_spans();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, Status::error("disk on fire"));
        assert_eq!(finished[0].events.events.len(), 1);
        assert_eq!(event_attr(&finished[0], EXCEPTION_MESSAGE), Some(Value::from("disk on fire")));
        assert_eq!(event_attr(&finished[0], ERROR_TYPE), Some(Value::from("Error")));
    }

    #[test]
    fn test_record_error_after_end_is_noop() {
        let (tracer, _provider, exporter) = tracer();
        let (cx, span) = tracer.start(&Context::new(), "op");
        span.end();

        record_error(&cx, &std::io::Error::other("late"));
        let finished = exporter.finished_spans();
        assert_eq!(finished[0].status, Status::Unset);
        assert_eq!(finished[0].events.events.len(), 0);
    }

    #[test]
    fn test_span_ends_once() {
        let (tracer, _provider, exporter) = tracer();
        let (cx, span) = tracer.start(&Context::new(), "op");
        cx.span().end();
        span.end();
        cx.span().end();

        assert_eq!(exporter.finished_spans().len(), 1);
    }

    #[test]
    fn test_dropped_guard_ends_span() {
        let (tracer, _provider, exporter) = tracer();
        let (_cx, span) = tracer.start(&Context::new(), "early-return");
        drop(span);

        assert_eq!(exporter.finished_spans().len(), 1);
    }

    #[test]
    fn test_child_links_to_parent() {
        let (tracer, _provider, exporter) = tracer();
        let (parent_cx, parent) = tracer.start_server(&Context::new(), "GET /");
        let (_cx, child) = tracer.start(&parent_cx, "child");
        child.end();
        parent.end();

        let finished = exporter.finished_spans();
        let child = finished.iter().find(|s| s.name == "child").unwrap();
        let parent = finished.iter().find(|s| s.name == "GET /").unwrap();
        assert_eq!(child.parent_span_id, parent.span_context.span_id());
        assert_eq!(child.span_context.trace_id(), parent.span_context.trace_id());
        assert_eq!(parent.span_kind, SpanKind::Server);
    }

    #[test]
    fn test_unsampled_remote_parent_is_not_recorded() {
        let (tracer, _provider, exporter) = tracer();
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "traceparent",
            axum::http::HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00"),
        );
        let parent = propagation::extract(&headers);

        let (cx, span) = tracer.start_server(&parent, "GET /");
        assert!(!cx.span().is_recording());
        record_error(&cx, &std::io::Error::other("ignored"));
        span.end();

        assert!(exporter.finished_spans().is_empty());
    }

    #[test]
    fn test_exception_keeps_caller_status() {
        let (tracer, _provider, exporter) = tracer();
        let (cx, span) = tracer.start(&Context::new(), "DeleteHandler");
        assert!(record_exception(&cx, &std::io::Error::other("missing row"), "simulated_error"));
        set_status(&cx, Status::error("Delete operation failed"));
        span.end();

        let finished = exporter.finished_spans();
        assert_eq!(finished[0].status, Status::error("Delete operation failed"));
        assert_eq!(event_attr(&finished[0], ERROR_TYPE), Some(Value::from("simulated_error")));
        assert!(!record_exception(&cx, &std::io::Error::other("late"), "x"));
    }

    #[test]
    fn test_error_status_is_not_downgraded() {
        let (tracer, _provider, exporter) = tracer();
        let (cx, span) = tracer.start(&Context::new(), "op");
        set_status(&cx, Status::error("first"));
        set_status(&cx, Status::Unset);
        span.end();

        assert_eq!(exporter.finished_spans()[0].status, Status::error("first"));
    }

    #[test]
    fn test_non_finite_attribute_is_skipped() {
        let (tracer, _provider, exporter) = tracer();
        let (_cx, span) = tracer.start(&Context::new(), "op");
        span.set_attribute(KeyValue::new("ratio", f64::NAN));
        span.set_attribute(KeyValue::new("route", "/items"));
        span.end();

        let finished = exporter.finished_spans();
        assert_eq!(finished[0].attributes.len(), 1);
        assert_eq!(finished[0].attributes[0].key.as_str(), "route");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }
}
