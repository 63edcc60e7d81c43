//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the item routes
//! - Wire up middleware (request ID, timeout, tracing, telemetry)
//! - Bind server to listener
//! - Stop accepting on shutdown and drain in-flight requests within the
//!   grace period

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{HandlerConfig, ServiceConfig};
use crate::http::handlers::{self, ItemStore};
use crate::http::instrumentation::{instrument_request, RequestInstrumentation};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::telemetry::error::TelemetryError;
use crate::telemetry::Telemetry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub instrumentation: Arc<RequestInstrumentation>,
    pub items: Arc<ItemStore>,
    pub handlers: HandlerConfig,
}

/// HTTP server for the items service.
pub struct HttpServer {
    router: Router,
    grace_period: Duration,
}

impl HttpServer {
    /// Registers the service's instruments and builds the router.
    ///
    /// Fails only if instrument registration fails (e.g. a duplicate name).
    pub fn new(config: &ServiceConfig, telemetry: &Telemetry) -> Result<Self, TelemetryError> {
        let items = Arc::new(ItemStore::default());
        let instrumentation = Arc::new(RequestInstrumentation::new(telemetry, items.clone())?);
        let state = AppState {
            instrumentation,
            items,
            handlers: config.handlers.clone(),
        };

        Ok(Self {
            router: Self::build_router(config, state),
            grace_period: Duration::from_secs(config.listener.grace_period_secs),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServiceConfig, state: AppState) -> Router {
        Router::new()
            .route("/", get(handlers::welcome))
            .route("/update", put(handlers::update))
            .route("/create", post(handlers::create))
            .route("/delete", delete(handlers::delete))
            .route_layer(middleware::from_fn_with_state(state.clone(), instrument_request))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.listener.request_timeout_secs)))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain.
    ///
    /// In-flight requests get the grace period to finish; after that the
    /// server returns and whatever is still running is dropped.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let (draining_tx, draining_rx) = oneshot::channel();
        let signal = async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server draining");
            let _ = draining_tx.send(());
        };
        let serve = axum::serve(listener, self.router.into_make_service()).with_graceful_shutdown(signal);

        let grace_period = self.grace_period;
        let grace = async move {
            if draining_rx.await.is_ok() {
                tokio::time::sleep(grace_period).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = serve => result?,
            _ = grace => {
                tracing::warn!(grace_period = ?grace_period, "Grace period elapsed, abandoning in-flight requests");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
