//! PromptGate gateway server
//!
//! An edge security gateway for LLM-bound text: authenticates callers,
//! enforces per-tenant quotas and a global IP blocklist, scans content
//! against an ordered signature set, optionally delegates inconclusive
//! content to an external ML classifier, and emits audit/analytics
//! events asynchronously.

use promptgate_core::GatewayConfig;
use promptgate_gateway::{build_router, AppState};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration: from CLI arg, env var, or default
    let config = load_gateway_config()?;

    info!(
        listen_addr = %config.listen_addr,
        storage_profile = %config.storage.profile,
        ml_fallback = config.ml_fallback.enabled,
        "Starting PromptGate gateway"
    );

    let listen_addr = config.listen_addr.clone();

    // Build shared application state and the router
    let state = AppState::from_config(config).await?;
    let app = build_router(state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(%listen_addr, "Gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load gateway configuration from a YAML file or fall back to defaults.
///
/// Checks (in order):
/// 1. First CLI argument as config path
/// 2. `PROMPTGATE_CONFIG` environment variable
/// 3. Default configuration
fn load_gateway_config() -> anyhow::Result<GatewayConfig> {
    let config_path: Option<PathBuf> = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PROMPTGATE_CONFIG").ok())
        .map(PathBuf::from);

    match config_path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from file");
            promptgate_gateway::config::load_config(&path)
        }
        None => {
            info!("No config file specified, using defaults");
            Ok(GatewayConfig::default())
        }
    }
}
