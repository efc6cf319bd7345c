//! Staff-facing HTTP API
//!
//! Provides:
//! - The merged report list and connection status
//! - Report submission, SOS and status updates
//! - Alert acknowledgement and monitoring exemptions

pub mod routes;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::alert::MonitorGuard;
use crate::error::{StorageError, SubmitError};
use crate::node::Node;

/// State shared across handlers
pub struct ApiState {
    pub node: Arc<Node>,
    /// Exemption held on behalf of the staff client
    pub monitor: Mutex<Option<MonitorGuard>>,
}

impl ApiState {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            monitor: Mutex::new(None),
        }
    }
}

pub type SharedState = Arc<ApiState>;

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::api_status))
        .route(
            "/api/reports",
            get(routes::api_reports).post(routes::api_submit),
        )
        .route("/api/reports/:id/status", post(routes::api_update_status))
        .route("/api/sos", post(routes::api_sos))
        .route("/api/alerts/ack", post(routes::api_ack_alerts))
        .route(
            "/api/monitoring",
            put(routes::api_start_monitoring).delete(routes::api_stop_monitoring),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Empty => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
            SubmitError::NotAnIncident { .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            SubmitError::Throttled(throttled) => ApiError {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: throttled.user_message(),
                retry_after_secs: Some(throttled.remaining_secs()),
            },
            SubmitError::Durability(_) => {
                ApiError::new(StatusCode::INSUFFICIENT_STORAGE, err.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            _ => ApiError::new(StatusCode::INSUFFICIENT_STORAGE, err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
