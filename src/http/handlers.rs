//! Demo item routes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use thiserror::Error;

use crate::http::instrumentation::{RequestContext, ResponseError};
use crate::http::server::AppState;
use crate::telemetry::trace::{self, Status};

/// Number of items created through `POST /create`.
#[derive(Debug, Default)]
pub struct ItemStore {
    count: AtomicU64,
}

impl ItemStore {
    pub fn create(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Fault simulated by the delete route.
#[derive(Debug, Error)]
#[error("intentional nil pointer dereference")]
pub struct MissingRecord;

pub async fn welcome() -> Json<MessageBody> {
    Json(MessageBody {
        message: "Hurray! welcome to application",
    })
}

pub async fn update(State(state): State<AppState>) -> Json<MessageBody> {
    tokio::time::sleep(Duration::from_millis(state.handlers.update_delay_ms)).await;
    Json(MessageBody {
        message: "Data updated!",
    })
}

pub async fn create(State(state): State<AppState>) -> Json<MessageBody> {
    let total = state.items.create();
    tracing::debug!(total, "Item created");
    Json(MessageBody {
        message: "Data created!",
    })
}

/// Always fails: records the fault on a `DeleteHandler` span, then answers 500.
pub async fn delete(State(state): State<AppState>, Extension(RequestContext(parent)): Extension<RequestContext>) -> Response {
    let (cx, span) = state.instrumentation.tracer.start(&parent, "DeleteHandler");

    let err = MissingRecord;
    trace::record_exception(&cx, &err, "simulated_error");
    trace::set_status(&cx, Status::error("Delete operation failed"));
    span.end();

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "Failed to delete data!",
            message: String::new(),
        }),
    )
        .into_response();
    response.extensions_mut().insert(ResponseError {
        error_type: "NullPointerException",
        message: err.to_string(),
    });
    response
}
