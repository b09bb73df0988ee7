//! Store Implementation

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    last_update: Option<DateTime<Utc>>,
}

/// Copy of the store taken under its lock
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreSnapshot {
    /// Output values by key
    pub values: HashMap<String, Value>,
    /// When any value was last written
    pub last_update: Option<DateTime<Utc>>,
}

/// Output values plus a global last-update timestamp behind one lock
#[derive(Debug, Default)]
pub struct OutputStore {
    inner: Mutex<StoreInner>,
}

impl OutputStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panicking writer leaves the map consistent: every mutation is a single insert
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value for `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    /// When any value was last written
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.lock().last_update
    }

    /// Copy every value
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.lock();
        StoreSnapshot {
            values: inner.values.clone(),
            last_update: inner.last_update,
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    /// Whether no value is stored
    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    /// Drop every value, e.g. when the request sequence changed
    pub fn clear(&self) {
        let mut inner = self.lock();
        debug!("Clearing {} output values", inner.values.len());
        inner.values.clear();
    }

    pub(crate) fn update(&self, key: &str, value: Value, at: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.last_update = Some(at);
        inner.values.insert(key.to_string(), value);
    }
}
