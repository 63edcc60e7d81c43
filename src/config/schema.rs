//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the items service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, request limits).
    pub listener: ListenerConfig,

    /// Demo handler behavior.
    pub handlers: HandlerConfig,

    /// Telemetry export pipelines.
    pub telemetry: TelemetryConfig,

    /// Logging and self-metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,

    /// How long in-flight requests may run after shutdown starts.
    pub grace_period_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            grace_period_secs: 10,
        }
    }
}

/// Demo handler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Simulated processing delay of `PUT /update`.
    pub update_delay_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self { update_delay_ms: 1000 }
    }
}

/// Telemetry pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute and instrumentation scope.
    pub service_name: String,

    /// Extra resource attributes attached to every batch.
    pub resource_labels: BTreeMap<String, String>,

    /// Trace collector.
    pub traces: CollectorEndpointConfig,

    /// Metrics collector.
    pub metrics: CollectorEndpointConfig,

    /// Collection interval of the periodic collector.
    pub export_interval_ms: u64,

    /// Time budget for one observable gauge callback.
    pub callback_timeout_ms: u64,

    /// Aggregation temporality for sums and histograms.
    pub temporality: Temporality,

    /// Bounded retry for export calls.
    pub retry: RetryConfig,

    /// Span batching.
    pub batch: SpanBatchConfig,

    /// Deadline for the final flush of each pipeline at shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "items-app".to_string(),
            resource_labels: BTreeMap::new(),
            traces: CollectorEndpointConfig::default(),
            metrics: CollectorEndpointConfig::default(),
            export_interval_ms: 5000,
            callback_timeout_ms: 500,
            temporality: Temporality::Delta,
            retry: RetryConfig::default(),
            batch: SpanBatchConfig::default(),
            shutdown_timeout_ms: 5000,
        }
    }
}

/// Aggregation temporality of exported sums and histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    /// Each export carries only the change since the previous one.
    #[default]
    Delta,
    /// Each export carries the running total since startup.
    Cumulative,
}

/// Connection parameters for one collector.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorEndpointConfig {
    /// Base URL (e.g., "https://ingest.example.com:4318"). Required.
    pub endpoint: String,

    /// Allow plain HTTP.
    pub insecure: bool,

    /// Headers sent with every export (e.g., access tokens).
    pub headers: BTreeMap<String, String>,

    /// Extra CA certificate (PEM) trusted for the collector.
    pub ca_cert_path: Option<String>,

    /// Transport timeout for one request.
    pub timeout_ms: u64,

    /// Honor `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` from the environment.
    pub system_proxy: bool,
}

impl Default for CollectorEndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            insecure: false,
            headers: BTreeMap::new(),
            ca_cert_path: None,
            timeout_ms: 10_000,
            system_proxy: true,
        }
    }
}

/// Retry configuration for exports.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,

    /// Upper bound on the backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Span batch processor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpanBatchConfig {
    /// Spans held before new ones are dropped.
    pub max_queue_size: usize,

    /// Largest batch sent in one export.
    pub max_export_batch_size: usize,

    /// Export interval for partially filled batches.
    pub scheduled_delay_ms: u64,
}

impl Default for SpanBatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay_ms: 5000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint for pipeline self-metrics.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
