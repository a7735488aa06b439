//! Startup helpers for the Propline messaging server.
//!
//! Standalone mode: `SQLite` storage next to the binary, empty in-memory
//! collaborator directories. Deployments embed the library and wire the
//! platform services in instead.

use std::path::PathBuf;
use std::process::ExitCode;

use crate::messaging::core::config::MessagingConfig;
use crate::server::{self, AppState, DEFAULT_PORT};

/// Run the server (used by the `propline-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Propline messaging core v{}", env!("CARGO_PKG_VERSION"));

    let config = config_from_env();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        return ExitCode::from(1);
    }

    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config, port)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve(
    config: MessagingConfig,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = AppState::standalone(config).await?;

    let purge_handle = state.purge_worker().spawn();
    let result = server::run_server(state, port).await;
    purge_handle.abort();

    result
}

/// Build configuration from environment overrides.
///
/// `PROPLINE_DB` overrides the `SQLite` path; everything else keeps its
/// default.
#[must_use]
pub fn config_from_env() -> MessagingConfig {
    let mut config = MessagingConfig::default();
    if let Ok(path) = std::env::var("PROPLINE_DB") {
        config.storage.sqlite_path = PathBuf::from(path);
    }
    config
}

/// Resolve the listen port from `PROPLINE_PORT`.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var("PROPLINE_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}
