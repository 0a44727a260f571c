//! MCP data gateway entry point.
//!
//! Features:
//! - Graceful shutdown with request draining
//! - Signal handling (SIGTERM, SIGINT)

use anyhow::{Context, Result};
use mcp_data_gateway::shutdown::{install_signal_handlers, new_shutdown_controller};
use mcp_data_gateway::{transport, AppState, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let version = env!("CARGO_PKG_VERSION");
    info!("MCP data gateway v{version} starting...");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        "Project: {}, datasets: {}, web search: {}",
        config.bigquery.project_id,
        match config.security.allowed_datasets.datasets() {
            Some(names) => names.iter().cloned().collect::<Vec<_>>().join(","),
            None => "*".to_string(),
        },
        if config.search_enabled() { "enabled" } else { "disabled" }
    );

    let shutdown_controller = new_shutdown_controller(&config.shutdown);
    install_signal_handlers(shutdown_controller.clone());

    let http = config.http.clone();
    let state = AppState::from_config(config)?;

    transport::serve(state, &http, shutdown_controller).await?;
    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing subscriber with stderr output.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,mcp_data_gateway=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
