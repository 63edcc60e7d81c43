//! Items service binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ─────────────▶ http server ─▶ instrumentation ─▶ handlers
//!                                        │
//!                         spans          │          measurements
//!                 ┌──────────────────────┴─────────────────────┐
//!                 ▼                                            ▼
//!        batch span processor                       instrument registry
//!                 │                                            │
//!                 │                                  periodic collector
//!                 ▼                                            ▼
//!          OTLP /v1/traces                             OTLP /v1/metrics
//! ```

use std::path::PathBuf;

use clap::Parser;

use items_service::config::load_config;
use items_service::lifecycle::startup;
use items_service::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "items-service", version, about = "Instrumented items API")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "ITEMS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        service = %config.telemetry.service_name,
        "items-service starting"
    );

    startup::run(config).await?;
    Ok(())
}
