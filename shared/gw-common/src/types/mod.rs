//! Shared Types

mod session;
mod webhook;

pub use session::*;
pub use webhook::*;
