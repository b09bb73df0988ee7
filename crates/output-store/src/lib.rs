//! Shared Output Store
//!
//! Decoded values published by the relay, guarded by one lock that external
//! readers share. Writes go through [`OutputWriter`], which notifies the
//! broadcast and logging collaborators around the locked update.

mod collaborators;
mod store;
mod writer;

pub use collaborators::{Broadcaster, ChannelBroadcaster, DataLogger, OutputUpdate, TracingLogger};
pub use store::{OutputStore, StoreSnapshot};
pub use writer::OutputWriter;

use thiserror::Error;

/// Errors reported by output collaborators
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Logging error: {0}")]
    LoggingError(String),
}
