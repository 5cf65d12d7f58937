//! # palaver-server
//!
//! The real-time messaging server for Palaver: durable direct messages with
//! inbox aggregation and read receipts, a presence-aware WebSocket relay for
//! live delivery, typing indicators and call signaling, and access-token
//! issuance for the external media framework.
//!
//! Identity verification, media transport, and blob storage for message
//! images all live in external collaborators; this binary owns the
//! messaging core only.

mod api;
mod auth;
mod config;
mod error;
mod presence;
mod relay;
mod signaling;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use palaver_store::Database;

use crate::api::AppState;
use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::presence::PresenceRegistry;
use crate::signaling::CallSignaling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_server=debug")),
        )
        .init();

    info!("Starting Palaver server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        calls_configured = config.call_app_id.is_some() && config.call_app_secret.is_some(),
        "Loaded configuration"
    );
    if config.auth_secret == [0u8; 32] {
        tracing::warn!("AUTH_SECRET not set, using all-zeros dev secret");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let presence = PresenceRegistry::new();
    let calls = CallSignaling::from_config(&config);
    let authenticator = Authenticator::new(config.auth_secret);

    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        presence,
        calls: calls.clone(),
        auth: Arc::new(authenticator),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic call-session cleanup (every 5 minutes, drop sessions idle
    // longer than the token lifetime).
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            calls.purge_stale(std::time::Duration::from_secs(3600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
