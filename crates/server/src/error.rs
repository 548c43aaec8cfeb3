//! API error types.

use crate::metrics::{record_admission_rejection, record_upload_error};
use axum::Json;
use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parcel_store::StoreError;
use parcel_upload::UploadError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Unavailable(_) => "unavailable",
            Self::Upload(e) => match e {
                UploadError::Validation(_) => "validation_failed",
                UploadError::AdmissionLimit { .. } => "admission_limit",
                UploadError::NotFound(_) => "not_found",
                UploadError::Integrity { .. } => "integrity_mismatch",
                UploadError::Backend(e) => store_code(e),
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upload(e) => match e {
                UploadError::Validation(_) => StatusCode::BAD_REQUEST,
                UploadError::AdmissionLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
                UploadError::NotFound(_) => StatusCode::NOT_FOUND,
                UploadError::Integrity { .. } => StatusCode::CONFLICT,
                UploadError::Backend(e) => store_status(e),
            },
        }
    }

    fn log(&self) {
        match self {
            Self::Upload(e) if e.is_load_shedding() => {
                tracing::warn!(error = %e, "request shed by admission limit");
            }
            Self::Upload(e @ UploadError::Integrity { .. }) => {
                tracing::error!(error = %e, "upload failed integrity verification");
            }
            _ if self.status_code().is_server_error() => {
                tracing::error!(code = self.code(), error = %self, "request failed");
            }
            _ => {
                tracing::debug!(code = self.code(), error = %self, "request rejected");
            }
        }
    }

    fn record(&self) {
        let Self::Upload(e) = self else {
            return;
        };
        if let UploadError::AdmissionLimit { scope, .. } = e {
            record_admission_rejection(scope.as_str());
        }
        record_upload_error(e.kind());
    }
}

fn store_code(e: &StoreError) -> &'static str {
    match e {
        StoreError::NotFound(_) => "not_found",
        StoreError::AlreadyExists(_) => "conflict",
        _ => "store_error",
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.body_text())
        } else {
            Self::BadRequest(format!("invalid JSON: {}", rejection.body_text()))
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.body_text())
        } else {
            Self::BadRequest(format!("failed to read body: {}", rejection.body_text()))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        self.record();

        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
