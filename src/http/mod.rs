//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout)
//!     → instrumentation.rs (server span, duration, error counter)
//!     → handlers.rs (item routes; delete records its fault on a child span)
//!     → Send to client
//! ```

pub mod handlers;
pub mod instrumentation;
pub mod request;
pub mod server;

pub use instrumentation::{RequestContext, RequestInstrumentation, ResponseError};
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
