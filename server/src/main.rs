//! WhatsApp Gateway Server - Main Entry Point
//!
//! Session provisioning, QR authentication and webhook delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gw_server::handshake::{
    self, ApiKeySource, ChainedApiKeys, HandshakeController, HttpBridgeTransport, PgApiKeys,
    StaticApiKeys,
};
use gw_server::sessions::SessionRegistry;
use gw_server::webhooks::{self, WebhookConfigStore, WebhookDispatcher, WebhookSender};
use gw_server::{api, config, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gw_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting WhatsApp Gateway"
    );

    // Initialize database (optional - state stays in memory without it)
    let db_pool = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sessions and webhook config are not persisted");
            None
        }
    };

    // Session registry
    let registry = Arc::new(SessionRegistry::new(db_pool.clone()));
    registry.hydrate().await?;

    // Webhook configuration
    let store = Arc::new(WebhookConfigStore::load(db_pool.clone()).await?);
    if let Some(url) = &config.webhook_url {
        store
            .bootstrap_default(url, config.webhook_secret.as_deref())
            .await?;
    }
    let sender = WebhookSender::new(
        Duration::from_secs(config.webhook_timeout_secs),
        config.webhook_max_attempts,
        Duration::from_millis(config.webhook_backoff_ms),
    )?;
    let dispatcher = WebhookDispatcher::new(store, sender);

    // Active API keys: database first, then static configuration
    let mut api_keys = ChainedApiKeys::new();
    if let Some(pool) = &db_pool {
        api_keys = api_keys.with(Arc::new(PgApiKeys::new(pool.clone())));
    }
    api_keys = api_keys.with(Arc::new(StaticApiKeys::new(config.active_api_keys.clone())));
    let api_keys: Arc<dyn ApiKeySource> = Arc::new(api_keys);

    // QR handshake
    let transport = HttpBridgeTransport::new(
        &config.transport_url,
        Duration::from_secs(config.transport_timeout_secs),
    )?;
    let controller = HandshakeController::new(
        Arc::clone(&registry),
        Arc::new(transport),
        config.qr_refresh_interval(),
    );
    info!(
        refresh_secs = config.qr_refresh_interval_secs,
        validity_secs = config.qr_validity_secs,
        "QR handshake controller initialized"
    );

    // Background tasks
    let shutdown = CancellationToken::new();
    let forwarder = webhooks::spawn_event_forwarder(
        dispatcher.clone(),
        registry.subscribe(),
        shutdown.clone(),
    );
    let sweeper = handshake::expiry::spawn_expiry_sweeper(
        Arc::clone(&registry),
        Duration::from_secs(config.qr_expiry_sweep_secs.max(1)),
        config.qr_validity(),
        shutdown.clone(),
    );

    if !config.has_basic_auth() {
        tracing::warn!("ADMIN_BASIC_AUTH not set, session and admin routes are unauthenticated");
    }

    // Build application state
    let bind_address = config.bind_address.clone();
    let state = api::AppState::new(config, controller, dispatcher, api_keys);

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(forwarder, sweeper);
    info!("Server shutdown complete");

    Ok(())
}
