//! Mapping of tracker errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fp_signature_tracker::TrackerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Tracker(err) => {
                let (status, code) = match err {
                    TrackerError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                    TrackerError::FutureHeight { .. } => (StatusCode::BAD_REQUEST, "future_height"),
                    TrackerError::TransientFetch(_) => (StatusCode::BAD_GATEWAY, "chain_unavailable"),
                    TrackerError::EpochUnavailable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "epoch_unavailable")
                    }
                    TrackerError::EngineStopped => (StatusCode::SERVICE_UNAVAILABLE, "engine_stopped"),
                    TrackerError::Configuration(_) | TrackerError::Serialization(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                    }
                };
                (status, code, err.to_string())
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message.clone()),
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message.clone())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "Request failed");
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
