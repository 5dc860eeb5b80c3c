//! Webhook Configuration & Delivery
//!
//! A default webhook target with per-session overrides, and HMAC-signed
//! delivery of session events with bounded retries.

pub mod delivery;
pub mod dispatch;
pub mod handlers;
pub mod queries;
pub mod signing;
pub mod store;
pub mod types;

pub use delivery::WebhookSender;
pub use dispatch::{spawn_event_forwarder, WebhookDispatcher};
pub use store::WebhookConfigStore;
pub use types::{DeliveryOutcome, WebhookError, WebhookScope, WebhookTarget};
