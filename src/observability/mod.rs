//! Observability of the service itself.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (telemetry pipeline health counters)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! Application spans and instruments live in `crate::telemetry`; this
//! module only reports on how that pipeline is doing.

pub mod logging;
pub mod metrics;
