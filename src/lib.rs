//! Items service: a small HTTP API instrumented with an in-process
//! telemetry pipeline that exports spans and metrics over OTLP/HTTP.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod telemetry;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use telemetry::Telemetry;
