//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Collector endpoints present, parseable, HTTPS unless insecure
//! - Validate value ranges (intervals > 0, batch sizes consistent)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{CollectorEndpointConfig, ServiceConfig};

/// One failed check, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be greater than 0"));
    }

    let telemetry = &config.telemetry;
    if telemetry.service_name.trim().is_empty() {
        errors.push(ValidationError::new("telemetry.service_name", "must not be empty"));
    }
    validate_endpoint("telemetry.traces", &telemetry.traces, &mut errors);
    validate_endpoint("telemetry.metrics", &telemetry.metrics, &mut errors);

    for (field, value) in [
        ("telemetry.export_interval_ms", telemetry.export_interval_ms),
        ("telemetry.callback_timeout_ms", telemetry.callback_timeout_ms),
        ("telemetry.shutdown_timeout_ms", telemetry.shutdown_timeout_ms),
        ("telemetry.batch.scheduled_delay_ms", telemetry.batch.scheduled_delay_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if telemetry.callback_timeout_ms >= telemetry.export_interval_ms && telemetry.export_interval_ms > 0 {
        errors.push(ValidationError::new(
            "telemetry.callback_timeout_ms",
            "must be shorter than export_interval_ms",
        ));
    }
    if telemetry.retry.max_attempts == 0 {
        errors.push(ValidationError::new("telemetry.retry.max_attempts", "must be at least 1"));
    }
    if telemetry.retry.base_delay_ms > telemetry.retry.max_delay_ms {
        errors.push(ValidationError::new(
            "telemetry.retry.base_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }
    if telemetry.batch.max_queue_size == 0 || telemetry.batch.max_export_batch_size == 0 {
        errors.push(ValidationError::new("telemetry.batch", "queue and batch sizes must be greater than 0"));
    } else if telemetry.batch.max_export_batch_size > telemetry.batch.max_queue_size {
        errors.push(ValidationError::new(
            "telemetry.batch.max_export_batch_size",
            "must not exceed max_queue_size",
        ));
    }

    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_endpoint(prefix: &str, endpoint: &CollectorEndpointConfig, errors: &mut Vec<ValidationError>) {
    let field = format!("{}.endpoint", prefix);
    if endpoint.endpoint.trim().is_empty() {
        errors.push(ValidationError::new(field, "collector endpoint is required"));
        return;
    }
    match Url::parse(&endpoint.endpoint) {
        Ok(url) => match url.scheme() {
            "https" => {}
            "http" if endpoint.insecure => {}
            "http" => errors.push(ValidationError::new(field, "plain http requires insecure = true")),
            other => errors.push(ValidationError::new(field, format!("unsupported scheme '{}'", other))),
        },
        Err(e) => errors.push(ValidationError::new(field, e.to_string())),
    }
    if endpoint.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", prefix), "must be greater than 0"));
    }
}
