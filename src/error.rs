use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{models::ErrorResponse, repository::StoreError, service::AuthError};

/// The one body every authentication failure in the middleware gets.
pub const AUTHENTICATION_REQUIRED: &str = "authentication required";

/// ApiError
///
/// The HTTP boundary's error taxonomy. Each variant carries the exact text that goes into
/// the `{"error": ...}` body; internal detail is logged where the error is converted and
/// never reaches the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal server error")]
    ServerFault,
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized(AUTHENTICATION_REQUIRED.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServerFault => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(message) => ApiError::BadRequest(message),
            AuthError::DuplicateIdentity => ApiError::Conflict(err.to_string()),
            AuthError::InvalidCredentials
            | AuthError::InvalidOrExpiredToken
            | AuthError::ReauthenticationRequired => ApiError::Unauthorized(err.to_string()),
            AuthError::NotFound => ApiError::NotFound(err.to_string()),
            AuthError::Password(_)
            | AuthError::Token(_)
            | AuthError::Store(_)
            | AuthError::Internal(_) => {
                tracing::error!(error = %err, "auth service failure");
                ApiError::ServerFault
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => ApiError::Conflict("resource already exists".to_string()),
            other => {
                tracing::error!(error = %other, "store failure");
                ApiError::ServerFault
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(reason = %rejection.body_text(), "request body rejected");
        ApiError::BadRequest("invalid request body".to_string())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(reason = %rejection.body_text(), "path parameter rejected");
        ApiError::BadRequest("invalid resource id".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenError;

    #[test]
    fn maps_service_errors_to_statuses() {
        let cases = [
            (AuthError::Validation("email is required".into()), StatusCode::BAD_REQUEST),
            (AuthError::DuplicateIdentity, StatusCode::CONFLICT),
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::InvalidOrExpiredToken, StatusCode::UNAUTHORIZED),
            (AuthError::NotFound, StatusCode::NOT_FOUND),
            (AuthError::Token(TokenError::MissingSecret), StatusCode::INTERNAL_SERVER_ERROR),
            (AuthError::Store(StoreError::Timeout), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn faults_do_not_leak_detail() {
        let err = ApiError::from(AuthError::Internal("pool exhausted on db-7".into()));
        assert_eq!(err.to_string(), "internal server error");
    }
}
