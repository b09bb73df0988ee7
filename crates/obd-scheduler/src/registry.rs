//! PID registry
//!
//! Answer lengths, decode modes, handlers, the request sequence and the
//! last decoded value of every PID.

use obd_protocol::command::pid_command;
use obd_protocol::{DecodeMode, DecodedValue, PidSpec};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Last decoded value per PID.
///
/// Cloning gives another handle on the same cache, so readers outside the
/// polling task see every update.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    values: Arc<RwLock<HashMap<u8, DecodedValue>>>,
}

impl ResponseCache {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<u8, DecodedValue>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, pid: u8) -> Option<DecodedValue> {
        self.read().get(&pid).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn insert(&self, pid: u8, value: DecodedValue) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid, value);
    }
}

/// Callback receiving the decoded payload of one PID.
///
/// The cache passed in still holds the previous value of that PID.
pub type PidHandler = Box<dyn FnMut(u8, &DecodedValue, &ResponseCache) + Send>;

/// Result of handing a positive answer to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Decoded and passed to the handler
    Handled(DecodedValue),
    /// Decoded, but nothing is registered to receive it
    Unhandled(DecodedValue),
    /// No answer length is known for this PID
    UnknownPid,
}

/// Everything the scheduler needs to know about PIDs
#[derive(Default)]
pub struct PidRegistry {
    specs: HashMap<u8, PidSpec>,
    handlers: HashMap<u8, PidHandler>,
    sequence: Vec<u8>,
    commands: HashMap<u8, Vec<u8>>,
    cache: ResponseCache,
}

impl PidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare how many payload bytes follow `pid` and how to convert them
    pub fn set_response_length(&mut self, pid: u8, length: usize, mode: DecodeMode) {
        self.specs.insert(pid, PidSpec::new(length, mode));
    }

    /// Register the callback for `pid`, replacing any previous one
    pub fn set_handler<F>(&mut self, pid: u8, handler: F)
    where
        F: FnMut(u8, &DecodedValue, &ResponseCache) + Send + 'static,
    {
        self.handlers.insert(pid, Box::new(handler));
    }

    /// Append `pid` to the request sequence and cache its request frame
    pub fn add_to_sequence(&mut self, pid: u8) {
        self.sequence.push(pid);
        self.commands.entry(pid).or_insert_with(|| pid_command(pid));
    }

    /// Empty the request sequence
    pub fn reset_sequence(&mut self) {
        self.sequence.clear();
        self.commands.clear();
    }

    /// Forget every definition and the sequence; cached responses survive
    pub fn reset(&mut self) {
        self.specs.clear();
        self.handlers.clear();
        self.reset_sequence();
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// Request frame for `pid`, if it is in the sequence
    pub fn command(&self, pid: u8) -> Option<&[u8]> {
        self.commands.get(&pid).map(Vec::as_slice)
    }

    pub fn spec(&self, pid: u8) -> Option<PidSpec> {
        self.specs.get(&pid).copied()
    }

    /// Last value decoded for `pid`
    pub fn last_response(&self, pid: u8) -> Option<DecodedValue> {
        self.cache.get(pid)
    }

    pub fn responses(&self) -> &ResponseCache {
        &self.cache
    }

    /// Decode `data` for `pid`, run its handler, then cache the value
    pub fn deliver(&mut self, pid: u8, data: &[u8]) -> Delivery {
        let Some(spec) = self.specs.get(&pid) else {
            return Delivery::UnknownPid;
        };
        let value = spec.decode(data);
        let handled = match self.handlers.get_mut(&pid) {
            Some(handler) => {
                handler(pid, &value, &self.cache);
                true
            }
            None => false,
        };
        self.cache.insert(pid, value.clone());
        if handled {
            Delivery::Handled(value)
        } else {
            Delivery::Unhandled(value)
        }
    }
}

impl fmt::Debug for PidRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidRegistry")
            .field("specs", &self.specs)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_deliver_integer() {
        let mut registry = PidRegistry::new();
        registry.set_response_length(0x0C, 2, DecodeMode::Integer);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.set_handler(0x0C, move |pid, value, _| {
            sink.lock().unwrap().push((pid, value.clone()));
        });

        let delivery = registry.deliver(0x0C, &[0x1A, 0xF8]);

        assert_eq!(delivery, Delivery::Handled(DecodedValue::Integer(6904)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0x0C, DecodedValue::Integer(6904))]
        );
        assert_eq!(
            registry.last_response(0x0C),
            Some(DecodedValue::Integer(6904))
        );
    }

    #[test]
    fn test_handler_sees_previous_value() {
        let mut registry = PidRegistry::new();
        registry.set_response_length(0x0D, 1, DecodeMode::Integer);
        let previous = Arc::new(Mutex::new(Vec::new()));
        let sink = previous.clone();
        registry.set_handler(0x0D, move |pid, _, cache| {
            sink.lock().unwrap().push(cache.get(pid));
        });

        registry.deliver(0x0D, &[10]);
        registry.deliver(0x0D, &[20]);

        assert_eq!(
            *previous.lock().unwrap(),
            vec![None, Some(DecodedValue::Integer(10))]
        );
    }

    #[test]
    fn test_extra_bytes_are_truncated() {
        let mut registry = PidRegistry::new();
        registry.set_response_length(0x05, 1, DecodeMode::Bytes);
        assert_eq!(
            registry.deliver(0x05, &[0x7B, 0x00, 0x11]),
            Delivery::Unhandled(DecodedValue::Bytes(vec![0x7B]))
        );
    }

    #[test]
    fn test_unknown_pid() {
        let mut registry = PidRegistry::new();
        assert_eq!(registry.deliver(0x42, &[0x01]), Delivery::UnknownPid);
        assert!(registry.responses().is_empty());
    }

    #[test]
    fn test_sequence_commands() {
        let mut registry = PidRegistry::new();
        registry.add_to_sequence(0x0C);
        registry.add_to_sequence(0x0D);
        registry.add_to_sequence(0x0C);
        assert_eq!(registry.sequence(), &[0x0C, 0x0D, 0x0C]);
        assert_eq!(registry.command(0x0D), Some(&b"010D\r"[..]));

        registry.reset_sequence();
        assert!(registry.sequence().is_empty());
        assert_eq!(registry.command(0x0D), None);
    }
}
