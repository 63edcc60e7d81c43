//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the self-metrics endpoint when enabled
//! - Build both telemetry pipelines before any traffic is accepted
//! - Bind the listener and serve until shutdown
//! - Drain requests, then flush traces and metrics
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - Telemetry shuts down after the server so that spans and measurements
//!   from drained requests are still exported

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ServiceConfig;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::observability::metrics;
use crate::telemetry::{Telemetry, TelemetryError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("failed to start metrics endpoint: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Runs the service until a termination signal arrives.
pub async fn run(config: ServiceConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));
    run_until(config, shutdown).await
}

/// Runs the service until `shutdown` is triggered.
pub async fn run_until(config: ServiceConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let telemetry = Telemetry::init(&config.telemetry)?;
    let server = match HttpServer::new(&config, &telemetry) {
        Ok(server) => server,
        Err(e) => {
            let _ = telemetry.shutdown().await;
            return Err(e.into());
        }
    };

    let listener = match TcpListener::bind(&config.listener.bind_address).await {
        Ok(listener) => listener,
        Err(source) => {
            let _ = telemetry.shutdown().await;
            return Err(StartupError::Bind {
                address: config.listener.bind_address.clone(),
                source,
            });
        }
    };

    let served = server.run(listener, shutdown.subscribe()).await;

    if let Err(e) = telemetry.shutdown().await {
        tracing::warn!(error = %e, "Telemetry did not shut down cleanly");
    }

    served.map_err(StartupError::Serve)?;
    tracing::info!("Shutdown complete");
    Ok(())
}
