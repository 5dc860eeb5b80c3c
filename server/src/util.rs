//! Shared utility functions

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gw_common::ApiErrorBody;

/// Build an error response with the `{ "error": { "code", "message" } }` body.
pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiErrorBody::new(code, message))).into_response()
}

/// Trim a string and treat blank input as absent.
///
/// ```
/// use gw_server::util::non_blank;
///
/// assert_eq!(non_blank(Some("  key ")), Some("key".to_string()));
/// assert_eq!(non_blank(Some("   ")), None);
/// assert_eq!(non_blank(None), None);
/// ```
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Longest URL accepted for webhook targets and endpoint overrides.
pub const MAX_URL_LEN: usize = 2048;

/// Check that `url` is an absolute `http`/`https` URL with a host.
pub fn validate_http_url(url: &str) -> Result<(), String> {
    if url.len() > MAX_URL_LEN {
        return Err(format!("URL must be at most {MAX_URL_LEN} characters"));
    }
    let parsed = reqwest::Url::parse(url).map_err(|_| "URL must be absolute".to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("URL must start with http:// or https://".to_string());
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err("URL must contain a host".to_string());
    }
    Ok(())
}
