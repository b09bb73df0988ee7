//! OBD Relay Server
//!
//! Runs the relay against the configured adapter and serves the output
//! store and link status over HTTP.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use obd_protocol::sim::{SimConfig, SimConnector, SIM_PORT};
use obd_protocol::SerialConnector;
use obd_scheduler::{load_parameters, ConfigPaths, Relay, RelayError, ResponseCache, StatusDisplay};
use output_store::{OutputStore, OutputWriter};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod routes;

/// Environment variable naming the configuration directory
pub const CONFIG_DIR_ENV: &str = "OBD_RELAY_CONFIG_DIR";
/// Environment variable naming the HTTP listen address
pub const HTTP_ADDR_ENV: &str = "OBD_RELAY_HTTP_ADDR";
/// Listen address when none is configured
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Link status shared between the relay and the health endpoint
#[derive(Debug, Default)]
pub struct LinkStatus {
    connected: AtomicBool,
    baud_rate: AtomicU32,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Line speed of the current connection
    pub fn baud_rate(&self) -> Option<u32> {
        self.is_connected()
            .then(|| self.baud_rate.load(Ordering::Acquire))
    }
}

impl StatusDisplay for LinkStatus {
    fn disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("Adapter disconnected");
        }
    }

    fn connected(&self, baud_rate: u32) {
        self.baud_rate.store(baud_rate, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        info!("Adapter connected at {} b/s", baud_rate);
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<OutputStore>,
    pub link: Arc<LinkStatus>,
    pub responses: ResponseCache,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<OutputStore>, link: Arc<LinkStatus>, responses: ResponseCache) -> Self {
        Self {
            store,
            link,
            responses,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub link: LinkHealth,
    pub output_count: usize,
}

/// Adapter link health
#[derive(Debug, Serialize)]
pub struct LinkHealth {
    pub connected: bool,
    pub baud_rate: Option<u32>,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/outputs", get(routes::outputs::get_outputs))
        .route("/api/v1/outputs/:key", get(routes::outputs::get_output))
        .route("/api/v1/pids/:pid", get(routes::pids::get_last_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connected = state.link.is_connected();
    Json(HealthResponse {
        status: if connected { "connected" } else { "disconnected" }.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        link: LinkHealth {
            connected,
            baud_rate: state.link.baud_rate(),
        },
        output_count: state.store.len(),
    })
}

/// Initialize logging; `RUST_LOG` overrides the default `info` level
pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

/// Configuration files inside `dir`
pub fn config_paths(dir: &Path) -> ConfigPaths {
    ConfigPaths {
        parameters: dir.join("parameters.toml"),
        sequence: dir.join("sequence.toml"),
    }
}

/// A relay running in the background
#[derive(Debug)]
pub struct RelayHandle {
    pub task: JoinHandle<()>,
    /// Last decoded value per PID
    pub responses: ResponseCache,
}

/// Build the relay for the configured port and run it in the background.
///
/// The port name at startup decides between the simulated adapter and a
/// real serial port.
pub fn spawn_relay(
    paths: ConfigPaths,
    writer: OutputWriter,
    link: Arc<LinkStatus>,
) -> Result<RelayHandle, RelayError> {
    let port = load_parameters(&paths.parameters)?.parameters.serial_port;
    if port == SIM_PORT {
        info!("Using the simulated adapter");
        let relay = Relay::new(SimConnector::new(SimConfig::default()), paths, writer, link)?;
        let responses = relay.responses();
        Ok(RelayHandle {
            task: tokio::spawn(relay.run()),
            responses,
        })
    } else {
        let relay = Relay::new(SerialConnector, paths, writer, link)?;
        let responses = relay.responses();
        Ok(RelayHandle {
            task: tokio::spawn(relay.run()),
            responses,
        })
    }
}

/// Serve the HTTP interface until the listener fails
pub async fn run_server(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
