//! OBD-II Relay Engine
//!
//! Polls a configured sequence of PIDs through an ELM327 adapter, hands
//! the decoded answers to per-PID handlers and keeps the connection alive:
//! a lost link leads to a new port, a new handshake and a new round.

pub mod config;
mod dispatch;
mod error;
mod registry;
mod relay;
mod reload;
mod scheduler;
pub mod sequence;

pub use config::{load_parameters, ConnectionParameters, LoadedParameters, PollTimeouts};
pub use dispatch::{Dispatch, ResponseDispatcher};
pub use error::{ConfigError, RelayError};
pub use registry::{Delivery, PidHandler, PidRegistry, ResponseCache};
pub use relay::{ConfigPaths, Relay, StatusDisplay, RECONNECT_DELAY};
pub use reload::WatchedFile;
pub use scheduler::{PollingScheduler, RoundReport};
pub use sequence::{OutputSpec, PidDefinition, SequenceDefinition};
