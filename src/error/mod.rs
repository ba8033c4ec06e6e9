//! HTTP error mapping for the loan API
//!
//! Lifecycle failures are converted into a JSON body of the form
//! `{ "error": { "code", "message" } }` with a matching status code.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::loan::{BusinessError, LoanError};

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Business(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    InternalError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Business(_) => "BUSINESS_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Business(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %message, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LoanError> for ApiError {
    fn from(err: LoanError) -> Self {
        match err {
            LoanError::Validation(message) => ApiError::ValidationError(message),
            LoanError::Business(BusinessError::NotFound) => {
                ApiError::NotFound(BusinessError::NotFound.to_string())
            }
            LoanError::Business(business) => ApiError::Business(business.to_string()),
            LoanError::Server(message) => ApiError::InternalError(message),
        }
    }
}

/// Well-formed JSON with missing or mistyped fields is a validation
/// failure; anything that is not JSON at all is a bad request.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::ValidationError(e.body_text()),
            other => ApiError::BadRequest(format!("Invalid JSON: {}", other.body_text())),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_error_mapping() {
        let not_found: ApiError = LoanError::Business(BusinessError::NotFound).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.error_code(), "NOT_FOUND");
        assert_eq!(not_found.to_string(), "loan not found");

        let business: ApiError = LoanError::Business(BusinessError::NotInvested).into();
        assert_eq!(business.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(business.error_code(), "BUSINESS_ERROR");
        assert_eq!(business.to_string(), "loan not invested");

        let validation: ApiError = LoanError::Validation("amount must be positive".into()).into();
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.error_code(), "VALIDATION_ERROR");

        let server: ApiError = LoanError::Server("operation timed out".into()).into();
        assert_eq!(server.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(server.error_code(), "INTERNAL_ERROR");
    }
}
