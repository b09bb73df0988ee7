//! ELM327 Protocol Engine
//!
//! This crate provides async serial communication with ELM327-compatible
//! OBD-II adapters: a byte channel with per-read timeouts, prompt-terminated
//! framing, the adapter handshake including baud rate renegotiation, and
//! classification of answer lines.

mod channel;
pub mod command;
mod error;
mod framing;
mod handshake;
mod pid;
mod protocol;
pub mod sim;

pub use channel::{ByteChannel, Connector, SerialConnector, SerialTransport, TraceFlags, DEFAULT_READ_TIMEOUT};
pub use error::ObdError;
pub use framing::{select_answer_line, AnswerAssembler, Feed, ANSWER_SCAN_LIMIT, PROMPT_SCAN_LIMIT};
pub use handshake::{BaudSwitch, BaudSwitchFailure, Handshake, HandshakeSettings, BAUD_ACK_TIMEOUT, RESET_TIMEOUT};
pub use pid::{parse_hex, AnswerLine, DecodeMode, DecodedValue, PidSpec, MAX_INTEGER_LENGTH, STOPPED};
pub use protocol::{BusProtocol, ProtocolSelector};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
}
