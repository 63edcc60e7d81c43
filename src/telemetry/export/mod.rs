//! Export transports and the retry layer in front of them.
//!
//! Delivery is at-most-once per attempt budget: a batch that still fails
//! after the last attempt is dropped and counted.

pub mod memory;
pub mod otlp;
pub mod retrying;

pub use retrying::{RetryingMetricExporter, RetryingSpanExporter};
