use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::models::job::JobId;
use crate::models::options::ValidationError;
use crate::services::store::StoreError;
use crate::services::upscaler::UpscaleError;

/// Errors surfaced by the job endpoints.
///
/// Rendered as `{"error": <message>, "code": <CODE>}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("image too large: {0}")]
    PayloadTooLarge(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("job not found")]
    NotFound,

    #[error("job {0} is not finished yet")]
    NotReady(JobId),

    /// Carries the message stored on the failed job.
    #[error("{0}")]
    JobFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::JobFailed(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::InvalidImage(_) => "INVALID_IMAGE",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::NotReady(_) => "NOT_READY",
            ApiError::JobFailed(_) => "JOB_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "error": message,
            "code": self.code(),
        });

        (self.status_code(), axum::Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.0)
    }
}

impl From<UpscaleError> for ApiError {
    fn from(err: UpscaleError) -> Self {
        match err {
            UpscaleError::InvalidImage(msg) => ApiError::InvalidImage(msg),
            UpscaleError::PayloadTooLarge(msg) => ApiError::PayloadTooLarge(msg),
            UpscaleError::BackendUnavailable(msg) => ApiError::BackendUnavailable(msg),
            other @ (UpscaleError::Processing(_) | UpscaleError::Timeout(_)) => {
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::Validation(err.body_text())
        }
    }
}
