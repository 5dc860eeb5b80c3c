//! QR Handshake
//!
//! Session provisioning, QR token issuance and the refresh loops that keep a
//! token scannable until the session authenticates.

pub mod api_keys;
pub mod controller;
pub mod expiry;
pub mod transport;

pub use api_keys::{ApiKeySource, ChainedApiKeys, PgApiKeys, StaticApiKeys};
pub use controller::{HandshakeController, HandshakeError, LoopExit};
pub use transport::{HttpBridgeTransport, QrTransport, ScanStatus, TransportError};
