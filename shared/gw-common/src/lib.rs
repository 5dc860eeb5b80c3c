//! WA Gateway Common Library
//!
//! Wire types shared by the gateway server and admin console clients.

pub mod error;
pub mod types;

pub use error::{ApiErrorBody, ApiErrorDetail};
pub use types::*;
