//! Broadcast and logging collaborators

use crate::StoreError;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Pushes output values to remote observers
pub trait Broadcaster: Send + Sync {
    /// Called before the store lock is taken
    fn broadcast(&self, key: &str, value: &Value);
}

/// Records output values with their capture time
pub trait DataLogger: Send + Sync {
    /// Receive the raw parameter table after each reload
    fn set_parameters(&self, parameters: &Value) -> Result<(), StoreError>;

    /// Record one value, called after the store lock is released
    fn log_data(&self, key: &str, value: &Value, captured_at: DateTime<Local>) -> Result<(), StoreError>;
}

/// One broadcast output value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputUpdate {
    pub key: String,
    pub value: Value,
}

/// Broadcaster over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<OutputUpdate>,
}

impl ChannelBroadcaster {
    /// Create a broadcaster keeping up to `capacity` updates for slow observers
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<OutputUpdate> {
        self.tx.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, key: &str, value: &Value) {
        // No observers is not an error
        let _ = self.tx.send(OutputUpdate {
            key: key.to_string(),
            value: value.clone(),
        });
    }
}

/// Data logger writing to the tracing output
#[derive(Debug, Default, Clone)]
pub struct TracingLogger;

impl DataLogger for TracingLogger {
    fn set_parameters(&self, parameters: &Value) -> Result<(), StoreError> {
        let keys = parameters.as_object().map(|map| map.len()).unwrap_or(0);
        info!("Logger received {} parameters", keys);
        Ok(())
    }

    fn log_data(&self, key: &str, value: &Value, captured_at: DateTime<Local>) -> Result<(), StoreError> {
        debug!("{} {} = {}", captured_at.format("%Y-%m-%d %H:%M:%S%.3f"), key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_broadcaster() {
        let broadcaster = ChannelBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();
        broadcaster.broadcast("speed", &json!(85));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.key, "speed");
        assert_eq!(update.value, json!(85));
    }

    #[test]
    fn test_broadcast_without_observers() {
        ChannelBroadcaster::new(8).broadcast("speed", &json!(85));
    }
}
