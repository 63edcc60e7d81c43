//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment variable {name}: {reason}")]
    Env { name: &'static str, reason: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load, override from the process environment, and validate.
///
/// Without a path the defaults are used as the base.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => ServiceConfig::default(),
    };
    finish(config, |name| std::env::var(name).ok())
}

pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Applies overrides from `lookup`, then validates.
pub fn finish<F>(mut config: ServiceConfig, lookup: F) -> Result<ServiceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Environment overrides.
///
/// - `PORT`: listener port, bound on all interfaces
/// - `SERVICE_NAME`: `telemetry.service_name`
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: both collector endpoints
/// - `OTEL_EXPORTER_OTLP_HEADERS`: `key=value` pairs separated by commas, added to both
/// - `INSECURE_MODE`: any non-empty value allows plain HTTP for both
pub fn apply_env_overrides<F>(config: &mut ServiceConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT").filter(|p| !p.is_empty()) {
        let port: u16 = port.parse().map_err(|_| ConfigError::Env {
            name: "PORT",
            reason: format!("'{}' is not a port number", port),
        })?;
        config.listener.bind_address = format!("0.0.0.0:{}", port);
    }

    if let Some(name) = lookup("SERVICE_NAME").filter(|n| !n.is_empty()) {
        config.telemetry.service_name = name;
    }

    if let Some(endpoint) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.is_empty()) {
        config.telemetry.traces.endpoint = endpoint.clone();
        config.telemetry.metrics.endpoint = endpoint;
    }

    if let Some(raw) = lookup("OTEL_EXPORTER_OTLP_HEADERS") {
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ConfigError::Env {
                    name: "OTEL_EXPORTER_OTLP_HEADERS",
                    reason: format!("'{}' is not a key=value pair", pair),
                });
            };
            let (key, value) = (key.trim().to_string(), value.trim().to_string());
            config.telemetry.traces.headers.insert(key.clone(), value.clone());
            config.telemetry.metrics.headers.insert(key, value);
        }
    }

    if lookup("INSECURE_MODE").is_some_and(|v| !v.is_empty()) {
        config.telemetry.traces.insecure = true;
        config.telemetry.metrics.insecure = true;
    }

    Ok(())
}
