//! OTLP/HTTP JSON exporters.
//!
//! One blocking `reqwest` client per pipeline, built once at startup and
//! used from the SDK export threads. Any problem building it (endpoint,
//! headers, CA material) is a fatal configuration error.

use std::collections::HashMap;
use std::fs;
use std::thread;
use std::time::Duration;

use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::config::{CollectorEndpointConfig, TelemetryConfig};
use crate::telemetry::error::TelemetryError;

pub use opentelemetry_otlp::{MetricExporter as OtlpMetricExporter, SpanExporter as OtlpSpanExporter};

const TRACES_PATH: &str = "v1/traces";
const METRICS_PATH: &str = "v1/metrics";

/// Validated transport settings for one signal.
struct Transport {
    url: Url,
    timeout: Duration,
    headers: HashMap<String, String>,
    client: reqwest::blocking::Client,
}

impl Transport {
    fn new(signal: &'static str, path: &str, config: &CollectorEndpointConfig) -> Result<Self, TelemetryError> {
        let url = signal_url(&config.endpoint, path, config.insecure)?;
        let build_error = |reason: String| TelemetryError::ExporterBuild { signal, reason };

        let mut headers = HashMap::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| build_error(format!("header name '{}': {}", name, e)))?;
            HeaderValue::from_str(value).map_err(|e| build_error(format!("header value for '{}': {}", name, e)))?;
            headers.insert(name.clone(), value.clone());
        }

        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if !config.system_proxy {
            builder = builder.no_proxy();
        }
        if let Some(path) = &config.ca_cert_path {
            let pem = fs::read(path).map_err(|e| build_error(format!("reading CA certificate '{}': {}", path, e)))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| build_error(format!("parsing CA certificate '{}': {}", path, e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().map_err(|e| build_error(e.to_string()))?;

        tracing::info!(signal, endpoint = %url, "OTLP exporter configured");
        Ok(Self {
            url,
            timeout,
            headers,
            client,
        })
    }
}

/// Resolves the per-signal URL, appending `path` unless already present.
fn signal_url(endpoint: &str, path: &str, insecure: bool) -> Result<Url, TelemetryError> {
    let invalid = |reason: String| TelemetryError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(invalid("endpoint is empty".to_string()));
    }

    let full = if trimmed.trim_end_matches('/').ends_with(path) {
        trimmed.to_string()
    } else if trimmed.ends_with('/') {
        format!("{}{}", trimmed, path)
    } else {
        format!("{}/{}", trimmed, path)
    };
    let url = Url::parse(&full).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if insecure => Ok(url),
        "http" => Err(invalid("plain http requires insecure mode".to_string())),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

/// Span exporter posting to `{endpoint}/v1/traces`.
///
/// Must not be called from async code: the blocking client runs its own
/// runtime.
pub fn span_exporter(config: &CollectorEndpointConfig) -> Result<OtlpSpanExporter, TelemetryError> {
    let transport = Transport::new("traces", TRACES_PATH, config)?;
    OtlpSpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpJson)
        .with_endpoint(transport.url.as_str())
        .with_timeout(transport.timeout)
        .with_headers(transport.headers)
        .with_http_client(transport.client)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild {
            signal: "traces",
            reason: e.to_string(),
        })
}

/// Metric exporter posting to `{endpoint}/v1/metrics`.
///
/// Must not be called from async code: the blocking client runs its own
/// runtime.
pub fn metric_exporter(config: &CollectorEndpointConfig) -> Result<OtlpMetricExporter, TelemetryError> {
    let transport = Transport::new("metrics", METRICS_PATH, config)?;
    OtlpMetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpJson)
        .with_endpoint(transport.url.as_str())
        .with_timeout(transport.timeout)
        .with_headers(transport.headers)
        .with_http_client(transport.client)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild {
            signal: "metrics",
            reason: e.to_string(),
        })
}

/// Builds both exporters on a plain thread, so it is safe to call from
/// inside a Tokio runtime.
pub fn build_exporters(config: &TelemetryConfig) -> Result<(OtlpSpanExporter, OtlpMetricExporter), TelemetryError> {
    let traces = config.traces.clone();
    let metrics = config.metrics.clone();
    let spawn_error = |reason: String| TelemetryError::ExporterBuild {
        signal: "traces",
        reason,
    };

    thread::Builder::new()
        .name("otlp-init".to_string())
        .spawn(move || -> Result<_, TelemetryError> { Ok((span_exporter(&traces)?, metric_exporter(&metrics)?)) })
        .map_err(|e| spawn_error(e.to_string()))?
        .join()
        .map_err(|_| spawn_error("exporter construction panicked".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> CollectorEndpointConfig {
        CollectorEndpointConfig {
            endpoint: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_signal_path_appended_once() {
        let url = signal_url("https://ingest.example.com", METRICS_PATH, false).unwrap();
        assert_eq!(url.as_str(), "https://ingest.example.com/v1/metrics");

        let url = signal_url("https://ingest.example.com/otlp/", TRACES_PATH, false).unwrap();
        assert_eq!(url.as_str(), "https://ingest.example.com/otlp/v1/traces");

        let url = signal_url("https://ingest.example.com/v1/traces", TRACES_PATH, false).unwrap();
        assert_eq!(url.as_str(), "https://ingest.example.com/v1/traces");
    }

    #[test]
    fn test_endpoint_rules() {
        assert!(matches!(
            signal_url("", TRACES_PATH, false),
            Err(TelemetryError::InvalidEndpoint { .. })
        ));
        assert!(signal_url("http://localhost:4318", TRACES_PATH, false).is_err());
        assert!(signal_url("http://localhost:4318", TRACES_PATH, true).is_ok());
        assert!(signal_url("grpc://localhost:4317", TRACES_PATH, true).is_err());
    }

    #[test]
    fn test_bad_header_is_fatal() {
        let mut config = endpoint("https://ingest.example.com");
        config.headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            span_exporter(&config),
            Err(TelemetryError::ExporterBuild { signal: "traces", .. })
        ));
    }

    #[test]
    fn test_missing_ca_file_is_fatal() {
        let mut config = endpoint("https://ingest.example.com");
        config.ca_cert_path = Some("/nonexistent/ca.pem".to_string());
        assert!(matches!(
            metric_exporter(&config),
            Err(TelemetryError::ExporterBuild { signal: "metrics", .. })
        ));
    }

    #[tokio::test]
    async fn test_exporters_build_inside_runtime() {
        let mut config = TelemetryConfig::default();
        config.traces = endpoint("http://127.0.0.1:4318");
        config.traces.insecure = true;
        config.metrics = endpoint("https://ingest.example.com/otlp");

        let (spans, metrics) = match build_exporters(&config) {
            Ok(exporters) => exporters,
            Err(e) => panic!("exporters failed to build: {}", e),
        };
        // Dropping the blocking clients inside the runtime would panic.
        thread::spawn(move || drop((spans, metrics))).join().unwrap();
    }
}
