//! Connection supervision
//!
//! Opens the port, runs the handshake, polls until the link is lost and
//! starts over. Configuration files are reloaded between rounds.

use crate::config::{load_parameters, ConnectionParameters, LoadedParameters};
use crate::error::RelayError;
use crate::registry::{PidRegistry, ResponseCache};
use crate::reload::WatchedFile;
use crate::scheduler::PollingScheduler;
use crate::sequence::SequenceDefinition;
use obd_protocol::{BaudSwitch, ByteChannel, Connector, Handshake, SerialTransport};
use output_store::OutputWriter;
use serde_json::Value;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause between two connection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Connection state shown to the user
pub trait StatusDisplay: Send + Sync {
    fn disconnected(&self);
    fn connected(&self, baud_rate: u32);
}

/// Locations of the two configuration files
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub parameters: PathBuf,
    pub sequence: PathBuf,
}

/// The relay: one adapter, one request sequence, one output store
pub struct Relay<C: Connector> {
    connector: C,
    parameters_file: WatchedFile,
    sequence_file: WatchedFile,
    parameters: ConnectionParameters,
    raw_parameters: Value,
    registry: PidRegistry,
    writer: OutputWriter,
    status: Arc<dyn StatusDisplay>,
}

impl<C: Connector> Relay<C> {
    /// Load both configuration files; any failure here is fatal
    pub fn new(
        connector: C,
        paths: ConfigPaths,
        writer: OutputWriter,
        status: Arc<dyn StatusDisplay>,
    ) -> Result<Self, RelayError> {
        let mut parameters_file = WatchedFile::new(paths.parameters);
        let mut sequence_file = WatchedFile::new(paths.sequence);
        parameters_file.changed()?;
        sequence_file.changed()?;

        let LoadedParameters { parameters, raw } = load_parameters(parameters_file.path())?;
        writer.set_parameters(&raw);

        let mut registry = PidRegistry::new();
        SequenceDefinition::load(sequence_file.path())?.apply(&mut registry, &writer);
        info!(
            "Relay configured for {} with {} PIDs in sequence",
            parameters.serial_port,
            registry.sequence().len()
        );

        Ok(Self {
            connector,
            parameters_file,
            sequence_file,
            parameters,
            raw_parameters: raw,
            registry,
            writer,
            status,
        })
    }

    pub fn parameters(&self) -> &ConnectionParameters {
        &self.parameters
    }

    pub fn registry(&self) -> &PidRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PidRegistry {
        &mut self.registry
    }

    /// Handle on the last decoded value of every PID
    pub fn responses(&self) -> ResponseCache {
        self.registry.responses().clone()
    }

    /// Reload the parameter file if it changed; the previous parameters
    /// stay in effect when the new file is broken
    pub fn reload_parameters(&mut self) -> bool {
        match self.parameters_file.changed() {
            Ok(false) => false,
            Ok(true) => match load_parameters(self.parameters_file.path()) {
                Ok(LoadedParameters { parameters, raw }) => {
                    self.parameters = parameters;
                    self.writer.set_parameters(&raw);
                    self.raw_parameters = raw;
                    info!("Parameters reloaded");
                    true
                }
                Err(e) => {
                    warn!("{}; keeping previous parameters", e);
                    false
                }
            },
            Err(e) => {
                warn!("{}; keeping previous parameters", e);
                false
            }
        }
    }

    /// Reload the sequence file if it changed; outputs of the previous
    /// sequence are dropped
    pub fn reload_sequence(&mut self) -> bool {
        let loaded = match self.sequence_file.changed() {
            Ok(false) => return false,
            Ok(true) => SequenceDefinition::load(self.sequence_file.path()),
            Err(e) => Err(e),
        };
        match loaded {
            Ok(definition) => {
                definition.apply(&mut self.registry, &self.writer);
                self.writer.clear();
                self.writer.set_parameters(&self.raw_parameters);
                info!(
                    "Sequence reloaded ({} PIDs)",
                    self.registry.sequence().len()
                );
                true
            }
            Err(e) => {
                warn!("{}; keeping previous sequence", e);
                false
            }
        }
    }

    /// Run forever, reconnecting after every failure
    pub async fn run(mut self) {
        let mut first_attempt = true;
        loop {
            self.status.disconnected();
            if !first_attempt {
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            first_attempt = false;

            match self.connect_and_poll().await {
                Ok(never) => match never {},
                Err(e) if e.is_channel_fault() => error!("Serial link error: {}", e),
                Err(e) => error!("{}", e),
            }
        }
    }

    /// One connection: open, handshake, poll until an error
    pub async fn connect_and_poll(&mut self) -> Result<Infallible, RelayError> {
        self.reload_parameters();
        let port = self.parameters.serial_port.clone();
        let initial = self.parameters.baud_rate_initial;
        info!("Opening {} at {} b/s", port, initial);

        let transport = self.connector.open(&port, initial)?;
        let mut channel = ByteChannel::new(transport, initial);
        channel.set_idle_timeout(self.parameters.handshake_timeout());
        channel.set_trace(self.parameters.trace_flags());

        self.handshake(&mut channel).await?;
        self.status.connected(channel.baud_rate());

        let mut scheduler = PollingScheduler::new(self.parameters.show_incorrect_result);
        scheduler.prepare(&mut channel, self.parameters.poll_timeouts());
        loop {
            scheduler
                .run_round(&mut channel, &mut self.registry, self.parameters.poll_timeouts())
                .await?;

            // Alternate which file is checked to spread the cost
            if scheduler.rounds() % 2 == 0 {
                self.reload_sequence();
            } else if self.reload_parameters() {
                channel.set_trace(self.parameters.trace_flags());
                scheduler.set_show_incorrect_result(self.parameters.show_incorrect_result);
                scheduler.update_timeouts(&mut channel, self.parameters.poll_timeouts());
            }

            scheduler.check_link(self.registry.sequence().len())?;
            scheduler.complete_round();
        }
    }

    async fn handshake<T: SerialTransport>(
        &mut self,
        channel: &mut ByteChannel<T>,
    ) -> Result<(), RelayError> {
        let settings = self.parameters.handshake_settings();
        let mut handshake = Handshake::new(channel, settings);
        let outcome = handshake
            .establish(|settings| {
                if self.reload_parameters() {
                    *settings = self.parameters.handshake_settings();
                }
            })
            .await?;
        match outcome {
            BaudSwitch::Applied => info!("Desired baud rate in use"),
            BaudSwitch::NotApplied(reason) => {
                info!("Staying at the initial baud rate ({:?})", reason)
            }
        }
        Ok(())
    }
}

impl<C: Connector> std::fmt::Debug for Relay<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("parameters", &self.parameters)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
