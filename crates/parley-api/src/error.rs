use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// API failure taxonomy. Every variant renders as a `{"message": ...}` body
/// with the matching status code, which is what clients branch on: 401 on a
/// protected route means refresh-and-retry once, 401 on refresh means
/// re-login, 403 means the email was never verified.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed request fields, duplicate signup identifiers.
    #[error("{0}")]
    Validation(String),

    /// Login with an unknown email or a wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Missing, invalid, or expired access token.
    #[error("{0}")]
    Unauthenticated(&'static str),

    /// Account exists but the address was never confirmed.
    #[error("Please verify your email")]
    EmailUnverified,

    /// Refresh credential absent, expired, or replaced by a newer login.
    #[error("{0}")]
    SessionExpired(&'static str),

    /// Anything unexpected. Details go to the log, never to the client.
    #[error("Server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::Unauthenticated(_)
            | ApiError::SessionExpired(_) => StatusCode::UNAUTHORIZED,
            ApiError::EmailUnverified => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            error!("Internal error: {err:#}");
        }

        let body = Json(serde_json::json!({ "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_the_taxonomy() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Unauthenticated("No token provided").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::EmailUnverified.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::SessionExpired("gone").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_never_leak_details() {
        let err = ApiError::Internal(anyhow::anyhow!("connection string was postgres://secret"));
        assert_eq!(err.to_string(), "Server error");
    }
}
