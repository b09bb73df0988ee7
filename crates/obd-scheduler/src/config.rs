//! Connection parameters
//!
//! Loaded from a TOML file; `OBD_RELAY__*` environment variables (double
//! underscore, e.g. `OBD_RELAY__SERIAL_PORT`) override file values. The full table, unknown keys included, is kept for the
//! data logger.

use crate::error::ConfigError;
use obd_protocol::command::baud_divisor;
use obd_protocol::{HandshakeSettings, ProtocolSelector, TraceFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "OBD_RELAY";
/// Between the prefix and the key; keeps `OBD_RELAY_CONFIG_DIR` and
/// friends out of the parameter table
const ENV_PREFIX_SEPARATOR: &str = "__";

/// Longest time the adapter may need to negotiate with the vehicle bus
pub const MAX_OBD_NEGOTIATION_TIME: Duration = Duration::from_secs(20);

fn default_baud_rate() -> u32 {
    38_400
}

fn default_request_timeout_ms() -> u64 {
    500
}

fn default_handshake_timeout_ms() -> u64 {
    500
}

/// Serial link and adapter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3"), or "sim" for the simulated adapter
    pub serial_port: String,
    /// Baud rate the adapter uses after power-on
    #[serde(default = "default_baud_rate")]
    pub baud_rate_initial: u32,
    /// Baud rate to negotiate with `ATBRD`
    #[serde(default = "default_baud_rate")]
    pub baud_rate_desired: u32,
    /// Reconnect instead of running at the initial rate when the switch fails
    #[serde(default)]
    pub baud_rate_desired_force: bool,
    /// Read timeout while polling (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Read timeout between handshake steps (milliseconds)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// `ATSP` selector
    #[serde(default)]
    pub bus_protocol: ProtocolSelector,
    /// Log every frame sent to the adapter
    #[serde(default)]
    pub show_sent_bytes: bool,
    /// Log every chunk received from the adapter
    #[serde(default)]
    pub show_received_bytes: bool,
    /// Log answers that are not hex
    #[serde(default)]
    pub show_incorrect_result: bool,
}

/// Read timeouts used by the polling scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeouts {
    /// Steady-state timeout per request
    pub request: Duration,
    /// Conservative timeout while the adapter negotiates with the bus
    pub negotiation: Duration,
}

impl ConnectionParameters {
    /// Parameters for `serial_port` with every other value at its default
    pub fn for_port(serial_port: &str) -> Self {
        Self {
            serial_port: serial_port.to_string(),
            baud_rate_initial: default_baud_rate(),
            baud_rate_desired: default_baud_rate(),
            baud_rate_desired_force: false,
            request_timeout_ms: default_request_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            bus_protocol: ProtocolSelector::default(),
            show_sent_bytes: false,
            show_received_bytes: false,
            show_incorrect_result: false,
        }
    }

    /// Reject values the engine cannot run with; warn about a desired
    /// rate the chip cannot be asked for
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial_port.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "serial_port",
                reason: "must not be empty".into(),
            });
        }
        for (name, rate) in [
            ("baud_rate_initial", self.baud_rate_initial),
            ("baud_rate_desired", self.baud_rate_desired),
        ] {
            if rate == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        for (name, ms) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if !self.desired_baud_rate_representable() {
            warn!(
                "The parameter baud_rate_desired is set to an insufficient value ({} b/s)!",
                self.baud_rate_desired
            );
        }
        Ok(())
    }

    /// Whether `ATBRD` can express the desired rate
    pub fn desired_baud_rate_representable(&self) -> bool {
        baud_divisor(self.baud_rate_desired).is_some()
    }

    /// Settings for the adapter handshake
    pub fn handshake_settings(&self) -> HandshakeSettings {
        HandshakeSettings {
            initial_baud_rate: self.baud_rate_initial,
            desired_baud_rate: self.baud_rate_desired,
            force_desired_baud_rate: self.baud_rate_desired_force,
            protocol: self.bus_protocol,
        }
    }

    /// Timeout between handshake steps
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Timeouts for the polling scheduler
    pub fn poll_timeouts(&self) -> PollTimeouts {
        let request = Duration::from_millis(self.request_timeout_ms);
        PollTimeouts {
            request,
            negotiation: request.max(MAX_OBD_NEGOTIATION_TIME),
        }
    }

    /// Byte-level tracing switches
    pub fn trace_flags(&self) -> TraceFlags {
        TraceFlags {
            sent: self.show_sent_bytes,
            received: self.show_received_bytes,
        }
    }
}

/// Parameters plus the raw table they came from
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedParameters {
    pub parameters: ConnectionParameters,
    pub raw: serde_json::Value,
}

/// Load and validate the parameter file
pub fn load_parameters(path: &Path) -> Result<LoadedParameters, ConfigError> {
    load_with_environment(path, None)
}

/// `environment` replaces the process environment when given
fn load_with_environment(
    path: &Path,
    environment: Option<config::Map<String, String>>,
) -> Result<LoadedParameters, ConfigError> {
    let parse_error = |source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let settings = config::Config::builder()
        .add_source(config::File::new(
            &path.to_string_lossy(),
            config::FileFormat::Toml,
        ))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_PREFIX_SEPARATOR)
                .try_parsing(true)
                .source(environment),
        )
        .build()
        .map_err(parse_error)?;

    let raw = settings
        .clone()
        .try_deserialize::<serde_json::Value>()
        .map_err(parse_error)?;
    let parameters = settings
        .try_deserialize::<ConnectionParameters>()
        .map_err(parse_error)?;
    parameters.validate()?;
    Ok(LoadedParameters { parameters, raw })
}
