//! Authentication Middleware

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::error::AuthError;
use crate::api::AppState;

/// Middleware to require HTTP basic auth when credentials are configured.
///
/// Passes every request through when `ADMIN_BASIC_AUTH` is unset.
///
/// # Usage
///
/// ```ignore
/// Router::new()
///     .route("/protected", get(handler))
///     .layer(axum::middleware::from_fn_with_state(state, require_basic_auth))
/// ```
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some((user, password)) = &state.config.admin_basic_auth else {
        return Ok(next.run(request).await);
    };

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let (given_user, given_password) = parse_basic(header).ok_or(AuthError::InvalidAuthHeader)?;
    // Both halves are always compared
    let user_ok = constant_time_eq(given_user.as_bytes(), user.as_bytes());
    let password_ok = constant_time_eq(given_password.as_bytes(), password.as_bytes());
    if !(user_ok & password_ok) {
        tracing::warn!("Rejected request with invalid basic auth credentials");
        return Err(AuthError::InvalidCredentials);
    }

    Ok(next.run(request).await)
}

/// Decode `Basic <base64(user:password)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
