//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sso_core::auth::AuthError;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::Internal(detail) => {
                error!(detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        debug!(error = %e, "auth error");
        match e {
            AuthError::InvalidCredentials => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::TokenRevoked
            | AuthError::InvalidToken
            | AuthError::UnexpectedSigningMethod => {
                AppError::Unauthorized("Invalid or expired token".into())
            }
            AuthError::InvalidStateFormat
            | AuthError::InvalidSignature
            | AuthError::InvalidDataFormat
            | AuthError::StateExpired => AppError::Unauthorized("Invalid or expired state".into()),
            AuthError::CodeNotValid => AppError::Unauthorized("Code is not valid".into()),
            AuthError::UnknownProvider(name) => {
                AppError::BadRequest(format!("Unknown provider: {name}"))
            }
            AuthError::NotFound => AppError::NotFound("Not found".into()),
            AuthError::CaptchaRejected => AppError::Forbidden("Captcha rejected".into()),
            AuthError::Ceremony(_) => AppError::BadRequest("WebAuthn verification failed".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
