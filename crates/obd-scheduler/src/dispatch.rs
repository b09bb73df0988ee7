//! Answer dispatch

use crate::registry::{Delivery, PidRegistry};
use obd_protocol::{AnswerLine, DecodedValue};
use tracing::{debug, info, warn};

/// What happened to one answer line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Positive answer decoded for a known PID
    Delivered { pid: u8, value: DecodedValue },
    /// Positive answer for a PID without a length
    UnknownPid(u8),
    /// The vehicle refused the request
    Negative,
    /// The bus was not ready; the adapter needs a new bus initiation
    Stopped,
    /// Non-hex text such as "NO DATA" or "CAN ERROR"
    Incorrect(String),
    /// Hex with a result type other than 0x41 or 0x7F
    Unexpected(Vec<u8>),
}

/// Routes answer lines to PID handlers
#[derive(Debug, Clone, Default)]
pub struct ResponseDispatcher {
    show_incorrect_result: bool,
}

impl ResponseDispatcher {
    pub fn new(show_incorrect_result: bool) -> Self {
        Self {
            show_incorrect_result,
        }
    }

    pub fn set_show_incorrect_result(&mut self, show: bool) {
        self.show_incorrect_result = show;
    }

    /// Classify `line` and deliver it; `last_pid` is the PID just requested
    pub fn dispatch(&self, registry: &mut PidRegistry, line: &str, last_pid: Option<u8>) -> Dispatch {
        match AnswerLine::parse(line) {
            AnswerLine::Positive { pid, data } => match registry.deliver(pid, &data) {
                Delivery::Handled(value) | Delivery::Unhandled(value) => {
                    Dispatch::Delivered { pid, value }
                }
                Delivery::UnknownPid => {
                    warn!("Answer for PID 0x{:02X} which has no response length", pid);
                    Dispatch::UnknownPid(pid)
                }
            },
            AnswerLine::Negative(_) => {
                debug!("Negative answer: {}", line);
                Dispatch::Negative
            }
            AnswerLine::Stopped => Dispatch::Stopped,
            AnswerLine::Unexpected(bytes) => {
                warn!("Unexpected OBD result type in: {}", line);
                Dispatch::Unexpected(bytes)
            }
            AnswerLine::NotHex(text) => {
                if self.show_incorrect_result {
                    match last_pid {
                        Some(pid) => info!("Incorrect OBD result (PID 0x{:02X}): {}", pid, text),
                        None => info!("Incorrect OBD result: {}", text),
                    }
                }
                Dispatch::Incorrect(text)
            }
        }
    }
}
