//! Output writer
//!
//! Write order: broadcast outside the lock, update under the lock, log
//! outside the lock. Collaborators rely on it.

use crate::collaborators::{Broadcaster, DataLogger};
use crate::store::OutputStore;
use chrono::{Local, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Handle used by PID handlers to publish values
#[derive(Clone)]
pub struct OutputWriter {
    store: Arc<OutputStore>,
    broadcaster: Arc<dyn Broadcaster>,
    logger: Arc<dyn DataLogger>,
}

impl OutputWriter {
    /// Create a writer over a shared store
    pub fn new(
        store: Arc<OutputStore>,
        broadcaster: Arc<dyn Broadcaster>,
        logger: Arc<dyn DataLogger>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            logger,
        }
    }

    /// Publish one value
    pub fn set(&self, key: &str, value: Value) {
        let captured_at = Local::now();
        self.broadcaster.broadcast(key, &value);
        self.store.update(key, value.clone(), Utc::now());
        if let Err(e) = self.logger.log_data(key, &value, captured_at) {
            warn!("Failed to log {}: {}", key, e);
        }
    }

    /// Current value for `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    /// Drop every published value
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Forward the raw parameter table to the logger
    pub fn set_parameters(&self, parameters: &Value) {
        if let Err(e) = self.logger.set_parameters(parameters) {
            warn!("Logger rejected parameters: {}", e);
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<OutputStore> {
        &self.store
    }
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
