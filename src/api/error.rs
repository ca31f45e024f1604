use crate::refresh::CoordinatorError;
use crate::validation::ValidationError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Temporary condition; the client may retry after `retry_after_secs`.
    #[error("Service unavailable: {message}")]
    Unavailable { message: String, retry_after_secs: u64 },

    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Unavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
        };

        let body = Json(json!({
            "error": message,
        }));

        match self {
            ApiError::Unavailable {
                retry_after_secs, ..
            } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::GateTimeout { .. } => ApiError::Unavailable {
                message: err.to_string(),
                retry_after_secs: 1,
            },
            CoordinatorError::StoreUnavailable(_) => ApiError::Unavailable {
                message: err.to_string(),
                retry_after_secs: 5,
            },
            CoordinatorError::NoData { .. } => ApiError::Unavailable {
                message: err.to_string(),
                retry_after_secs: 30,
            },
            CoordinatorError::UpstreamCompute { .. } => ApiError::Upstream(err.to_string()),
        }
    }
}
