//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;
use store::StoreError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Saga execution error.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Saga(err) => saga_status(err),
        }
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_conflict() {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Saga(SagaError::Domain(err))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Saga(SagaError::Store(err))
    }
}
