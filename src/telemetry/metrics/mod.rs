//! Metric instruments and the periodic export pipeline.
//!
//! # Data Flow
//! ```text
//! Request handlers:
//!     → Counter::add / Histogram::record (validated, then SDK aggregation)
//!
//! Every export interval (SDK periodic reader thread):
//!     → each gauge callback invoked once, on its own thread under a budget
//!     → ResourceMetrics for the interval, delta temporality by default
//!     → RetryingMetricExporter (sanitize, bounded retry, then dropped)
//!     → OTLP metric exporter
//! ```
//!
//! # Design Decisions
//! - Instrument names are unique per meter, case-insensitively
//! - Gauge callbacks are owned by the SDK meter; only a collection runs them

mod collector;
mod gauge;
mod instruments;
mod registry;

pub use collector::{CollectorState, PeriodicCollector};
pub(crate) use collector::StateCell;
pub use instruments::{Counter, Descriptor, GaugeBuilder, Histogram, InstrumentBuilder, Number, ObservableGauge, Observer};
pub use registry::Meter;
