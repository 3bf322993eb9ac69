use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use vigil_application::ServiceError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) | ApiError::Service(ServiceError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT")
            }
            ApiError::Service(ServiceError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Service(ServiceError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Service(ServiceError::Backend(err)) => {
                tracing::error!(error = ?err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "BACKEND")
            }
        };
        let error = match &self {
            ApiError::Service(ServiceError::Backend(_)) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
