//! Per-request telemetry glue.
//!
//! # Responsibilities
//! - Open a server span named `"{METHOD} {route}"`, parented on an inbound
//!   `traceparent` when present
//! - Hand the span's context to handlers through a request extension
//! - Record `request_duration` and, for 5xx responses, `http_errors`
//! - End the span on every exit path
//!
//! # Design Decisions
//! - Runs as a route layer so the matched route template, not the raw path,
//!   names the span and labels the metrics
//! - A 5xx response carrying a [`ResponseError`] records it on the server
//!   span as an exception event; any other 5xx only marks the span Error
//! - An inbound parent that was not sampled yields a non-recording span
//! - If the handler future is dropped (timeout, disconnect) the span still
//!   ends through `Drop`

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::http::handlers::ItemStore;
use crate::http::request::RequestIdExt;
use crate::http::server::AppState;
use thiserror::Error;

use crate::telemetry::error::TelemetryError;
use crate::telemetry::metrics::{Counter, Histogram, ObservableGauge};
use crate::telemetry::trace::{self, propagation, Status, Tracer};
use crate::telemetry::{Context, KeyValue, Telemetry};

/// Span context for the current request, inserted by [`instrument_request`].
#[derive(Clone)]
pub struct RequestContext(pub Context);

/// Error a handler attaches to a failed response. `error_type` becomes the
/// `error_type` label of `http_errors` and classifies the exception event on
/// the server span.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ResponseError {
    pub error_type: &'static str,
    pub message: String,
}

const DEFAULT_ERROR_TYPE: &str = "http_5xx";

/// Tracer and instruments shared by every request.
pub struct RequestInstrumentation {
    pub tracer: Tracer,
    pub http_errors: Counter<u64>,
    pub request_duration: Histogram<u64>,
    _items_count: ObservableGauge<f64>,
}

impl RequestInstrumentation {
    /// Registers the service's instruments on the telemetry meter.
    pub fn new(telemetry: &Telemetry, items: Arc<ItemStore>) -> Result<Self, TelemetryError> {
        let service = telemetry.resource().service_name().to_string();
        let meter = telemetry.meter();

        let http_errors = meter
            .counter::<u64>("http_errors")
            .with_unit("1")
            .with_description("Counts exceptions in the system")
            .build()?;
        let request_duration = meter
            .histogram::<u64>("request_duration")
            .with_unit("ms")
            .with_description("HTTP request duration")
            .build()?;
        let items_count = meter
            .observable_gauge::<f64>("items_count")
            .with_unit("1")
            .with_description("Number of items created")
            .with_callback(move |observer| {
                observer.observe(items.count() as f64, &[KeyValue::new("process", "data")]);
                Ok(())
            })
            .build()?;

        Ok(Self {
            tracer: telemetry.tracer(service),
            http_errors,
            request_duration,
            _items_count: items_count,
        })
    }
}

/// Route-layer middleware wrapping every matched request in a server span.
pub async fn instrument_request(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let instrumentation = &state.instrumentation;
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let parent = propagation::extract(request.headers());
    let (cx, span) = instrumentation
        .tracer
        .start_server(&parent, format!("{} {}", method, route));
    span.set_attribute(KeyValue::new("http.method", method.to_string()));
    span.set_attribute(KeyValue::new("http.route", route.clone()));
    if let Some(id) = request.request_id() {
        span.set_attribute(KeyValue::new("http.request_id", id.to_string()));
    }
    request.extensions_mut().insert(RequestContext(cx.clone()));

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let status = response.status();
    span.set_attribute(KeyValue::new("http.status_code", i64::from(status.as_u16())));
    instrumentation.request_duration.record(
        &cx,
        elapsed_ms,
        &[KeyValue::new("path", route.clone()), KeyValue::new("method", method.as_str().to_string())],
    );

    if status.is_server_error() {
        let error = response.extensions().get::<ResponseError>();
        match error {
            Some(err) => trace::record_error_with_type(&cx, err, err.error_type),
            None => trace::set_status(&cx, Status::error(status.to_string())),
        }
        let error_type = error.map(|e| e.error_type).unwrap_or(DEFAULT_ERROR_TYPE);
        instrumentation.http_errors.add(
            &cx,
            1,
            &[KeyValue::new("endpoint", route.clone()), KeyValue::new("error_type", error_type)],
        );
        tracing::warn!(method = %method, route = %route, status = status.as_u16(), error_type, "Request failed");
    } else {
        tracing::debug!(method = %method, route = %route, status = status.as_u16(), elapsed_ms, "Request completed");
    }

    span.end();
    response
}
