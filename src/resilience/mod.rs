//! Resilience for collector exports.
//!
//! # Data Flow
//! ```text
//! Export attempt failed:
//!     → retries.rs (retryable check, closing check, attempt budget)
//!     → On retry: backoff.rs (jittered exponential delay)
//!     → After the last attempt: batch dropped, self-metric incremented
//! ```

pub mod backoff;
pub mod retries;
