//! WhatsApp Gateway Server
//!
//! Provisions messaging-agent sessions, drives their QR authentication
//! handshake, and delivers signed session events to configured webhooks.

pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod handshake;
pub mod sessions;
pub mod util;
pub mod webhooks;
