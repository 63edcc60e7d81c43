//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use items_service::config::ServiceConfig;
use items_service::http::HttpServer;
use items_service::lifecycle::Shutdown;
use items_service::telemetry::export::memory::{InMemoryMetricExporter, InMemorySpanExporter};
use items_service::telemetry::Telemetry;

/// Config tuned for tests: no periodic ticks get in the way, short delays.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.grace_period_secs = 2;
    config.handlers.update_delay_ms = 50;
    config.telemetry.export_interval_ms = 60_000;
    config.telemetry.callback_timeout_ms = 200;
    config.telemetry.shutdown_timeout_ms = 2_000;
    config.telemetry.batch.scheduled_delay_ms = 60_000;
    config.telemetry.retry.base_delay_ms = 10;
    config.telemetry.retry.max_delay_ms = 50;
    config
}

/// A running service wired to in-memory exporters.
pub struct TestApp {
    pub addr: SocketAddr,
    pub telemetry: Telemetry,
    pub spans: InMemorySpanExporter,
    pub metrics: InMemoryMetricExporter,
    pub shutdown: Shutdown,
    pub server: JoinHandle<std::io::Result<()>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stops the server and waits for it to drain.
    pub async fn stop(self) -> Telemetry {
        self.shutdown.trigger();
        let _ = self.server.await;
        self.telemetry
    }
}

pub fn in_memory_telemetry(config: &ServiceConfig) -> (Telemetry, InMemorySpanExporter, InMemoryMetricExporter) {
    let spans = InMemorySpanExporter::default();
    let metrics = InMemoryMetricExporter::default();
    let telemetry = Telemetry::with_exporters(&config.telemetry, spans.clone(), metrics.clone());
    (telemetry, spans, metrics)
}

pub async fn spawn_app(config: ServiceConfig) -> TestApp {
    let (telemetry, spans, metrics) = in_memory_telemetry(&config);
    let server = HttpServer::new(&config, &telemetry).unwrap();
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let server = tokio::spawn(async move { server.run(listener, rx).await });

    TestApp {
        addr,
        telemetry,
        spans,
        metrics,
        shutdown,
        server,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// One request received by the mock collector.
#[derive(Debug, Clone)]
pub struct Received {
    pub path: String,
    pub body: serde_json::Value,
}

#[derive(Clone, Default)]
struct CollectorState {
    received: Arc<Mutex<Vec<Received>>>,
    reject_remaining: Arc<AtomicUsize>,
    reject_status: Arc<AtomicUsize>,
}

/// OTLP/HTTP JSON collector on a local port that records every request.
pub struct MockCollector {
    pub addr: SocketAddr,
    state: CollectorState,
}

impl MockCollector {
    pub async fn start() -> Self {
        let state = CollectorState::default();
        let app = Router::new()
            .route("/v1/traces", post(record))
            .route("/v1/metrics", post(record))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The next `count` requests are answered with `status` and not recorded.
    pub fn reject_next(&self, count: usize, status: u16) {
        self.state.reject_status.store(status as usize, Ordering::SeqCst);
        self.state.reject_remaining.store(count, Ordering::SeqCst);
    }

    pub fn received(&self, path: &str) -> Vec<serde_json::Value> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .map(|r| r.body.clone())
            .collect()
    }
}

async fn record(State(state): State<CollectorState>, OriginalUri(uri): OriginalUri, Json(body): Json<serde_json::Value>) -> StatusCode {
    let rejected = state
        .reject_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if rejected {
        let status = state.reject_status.load(Ordering::SeqCst) as u16;
        return StatusCode::from_u16(status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    }

    state.received.lock().unwrap().push(Received {
        path: uri.path().to_string(),
        body,
    });
    StatusCode::OK
}

/// Value of `key` in an OTLP JSON attribute list, as a string.
pub fn otlp_attr(attributes: &serde_json::Value, key: &str) -> Option<String> {
    attributes.as_array()?.iter().find(|kv| kv["key"] == key).and_then(|kv| {
        let value = &kv["value"];
        value["stringValue"]
            .as_str()
            .or_else(|| value["intValue"].as_str())
            .map(str::to_string)
    })
}
