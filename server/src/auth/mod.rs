//! Authentication
//!
//! Optional HTTP basic auth over the admin and session routes.

mod error;
mod middleware;

pub use error::AuthError;
pub use middleware::require_basic_auth;
