//! OBD Relay - Main Entry Point

use anyhow::Context;
use api::{
    config_paths, init_logging, run_server, spawn_relay, AppState, LinkStatus, CONFIG_DIR_ENV,
    DEFAULT_HTTP_ADDR, HTTP_ADDR_ENV,
};
use output_store::{ChannelBroadcaster, OutputStore, OutputWriter, TracingLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    info!("=== OBD Relay v{} ===", env!("CARGO_PKG_VERSION"));

    let config_dir = std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"));
    let paths = config_paths(&config_dir);

    let store = Arc::new(OutputStore::new());
    let writer = OutputWriter::new(
        store.clone(),
        Arc::new(ChannelBroadcaster::new(256)),
        Arc::new(TracingLogger),
    );
    let link = Arc::new(LinkStatus::default());

    let relay = spawn_relay(paths, writer, link.clone())
        .with_context(|| format!("Cannot start the relay from {}", config_dir.display()))?;

    let addr = std::env::var(HTTP_ADDR_ENV).unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string());
    let state = Arc::new(AppState::new(store, link, relay.responses.clone()));

    tokio::select! {
        result = run_server(&addr, state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    relay.task.abort();
    Ok(())
}
