//! Authentication Error Types

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::util::api_error;

/// Authentication error types.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing Authorization header.
    #[error("Missing authorization header")]
    MissingAuthHeader,

    /// Header present but not `Basic <base64>`.
    #[error("Invalid authorization header format")]
    InvalidAuthHeader,

    /// Wrong username or password.
    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let code = match &self {
            Self::MissingAuthHeader => "MISSING_AUTH",
            Self::InvalidAuthHeader => "INVALID_AUTH_HEADER",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
        };

        let mut response = api_error(StatusCode::UNAUTHORIZED, code, self.to_string());
        response.headers_mut().insert(
            WWW_AUTHENTICATE,
            axum::http::HeaderValue::from_static(r#"Basic realm="gateway""#),
        );
        response
    }
}
