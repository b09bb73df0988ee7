//! Answer classification and payload decoding
//!
//! Answers are hex lines: `41 <pid> <data..>` for a positive response,
//! `7F ..` when the vehicle refuses the request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading byte of a positive current-data response
pub const POSITIVE_RESPONSE: u8 = 0x41;
/// Leading byte of a negative response
pub const NEGATIVE_RESPONSE: u8 = 0x7F;
/// Answer sent when the bus was not ready for the request
pub const STOPPED: &str = "STOPPED";
/// Widest payload that fits an integer decode
pub const MAX_INTEGER_LENGTH: usize = 8;

/// How the payload of a PID is handed to its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Payload bytes as received
    #[default]
    Bytes,
    /// Payload as a big-endian unsigned integer
    Integer,
}

impl DecodeMode {
    /// Whether a payload of `length` bytes decodes without loss
    pub fn fits(self, length: usize) -> bool {
        match self {
            DecodeMode::Bytes => true,
            DecodeMode::Integer => length <= MAX_INTEGER_LENGTH,
        }
    }
}

/// Expected answer shape for one PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidSpec {
    /// Payload bytes after the PID
    pub length: usize,
    /// Conversion applied to the payload
    pub mode: DecodeMode,
}

impl PidSpec {
    /// Create a spec
    pub fn new(length: usize, mode: DecodeMode) -> Self {
        Self { length, mode }
    }

    /// Extract and convert the payload following the PID byte
    pub fn decode(&self, data: &[u8]) -> DecodedValue {
        let payload = &data[..self.length.min(data.len())];
        match self.mode {
            DecodeMode::Bytes => DecodedValue::Bytes(payload.to_vec()),
            DecodeMode::Integer => DecodedValue::Integer(
                payload
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            ),
        }
    }
}

/// A decoded payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// Raw payload bytes
    Bytes(Vec<u8>),
    /// Big-endian unsigned integer
    Integer(u64),
}

impl DecodedValue {
    /// Numeric view: the integer itself, or the bytes read big-endian
    pub fn as_u64(&self) -> u64 {
        match self {
            DecodedValue::Integer(v) => *v,
            DecodedValue::Bytes(bytes) => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        }
    }

    /// Byte `index` of the payload (`A` = 0, `B` = 1, ...)
    pub fn byte(&self, index: usize) -> Option<u8> {
        match self {
            DecodedValue::Bytes(bytes) => bytes.get(index).copied(),
            DecodedValue::Integer(_) => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Integer(v) => write!(f, "{}", v),
            DecodedValue::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// What an answer line turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerLine {
    /// `41 <pid> <data..>`
    Positive { pid: u8, data: Vec<u8> },
    /// `7F ..`: the vehicle refused the request
    Negative(Vec<u8>),
    /// The bus was not ready
    Stopped,
    /// Hex, but with a result type we don't handle
    Unexpected(Vec<u8>),
    /// Not hex at all
    NotHex(String),
}

impl AnswerLine {
    /// Classify an answer line
    pub fn parse(line: &str) -> Self {
        let Some(bytes) = parse_hex(line) else {
            if line == STOPPED {
                return AnswerLine::Stopped;
            }
            return AnswerLine::NotHex(line.to_string());
        };
        match bytes.as_slice() {
            [POSITIVE_RESPONSE, pid, data @ ..] => AnswerLine::Positive {
                pid: *pid,
                data: data.to_vec(),
            },
            [NEGATIVE_RESPONSE, ..] => AnswerLine::Negative(bytes),
            _ => AnswerLine::Unexpected(bytes),
        }
    }
}

/// Decode hex pairs; whitespace is allowed between pairs, not inside one
pub fn parse_hex(line: &str) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(line.len() / 2);
    let mut chars = line.chars();
    loop {
        let high = match chars.next() {
            None => return Some(bytes),
            Some(c) if c.is_ascii_whitespace() => continue,
            Some(c) => c.to_digit(16)?,
        };
        let low = chars.next()?.to_digit(16)?;
        bytes.push((high * 16 + low) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_integer_decode() {
        let AnswerLine::Positive { pid, data } = AnswerLine::parse("410C1AF8") else {
            panic!("expected a positive answer");
        };
        assert_eq!(pid, 0x0C);
        let value = PidSpec::new(2, DecodeMode::Integer).decode(&data);
        assert_eq!(value, DecodedValue::Integer(0x1AF8));
        assert_eq!(value.as_u64(), 6904);
    }

    #[test]
    fn test_payload_truncated_to_expected_length() {
        let value = PidSpec::new(1, DecodeMode::Bytes).decode(&[0x55, 0x99]);
        assert_eq!(value, DecodedValue::Bytes(vec![0x55]));
        assert_eq!(value.byte(0), Some(0x55));
        assert_eq!(value.to_string(), "55");
    }

    #[test]
    fn test_short_payload_is_kept() {
        let value = PidSpec::new(4, DecodeMode::Integer).decode(&[0x01]);
        assert_eq!(value, DecodedValue::Integer(1));
    }

    #[test]
    fn test_integer_width() {
        assert!(DecodeMode::Integer.fits(MAX_INTEGER_LENGTH));
        assert!(!DecodeMode::Integer.fits(MAX_INTEGER_LENGTH + 1));
        assert!(DecodeMode::Bytes.fits(32));
    }

    #[test]
    fn test_spaced_hex() {
        assert_eq!(parse_hex("41 0C 1A F8 "), Some(vec![0x41, 0x0C, 0x1A, 0xF8]));
        assert_eq!(parse_hex("4 10C"), None);
        assert_eq!(parse_hex("410"), None);
        assert_eq!(parse_hex(""), Some(vec![]));
    }

    #[test]
    fn test_classification() {
        assert_eq!(AnswerLine::parse("STOPPED"), AnswerLine::Stopped);
        assert_eq!(
            AnswerLine::parse("7F0112"),
            AnswerLine::Negative(vec![0x7F, 0x01, 0x12])
        );
        assert_eq!(
            AnswerLine::parse("NO DATA"),
            AnswerLine::NotHex("NO DATA".to_string())
        );
        assert_eq!(AnswerLine::parse(""), AnswerLine::Unexpected(vec![]));
        assert_eq!(AnswerLine::parse("41"), AnswerLine::Unexpected(vec![0x41]));
        assert_eq!(
            AnswerLine::parse("4300"),
            AnswerLine::Unexpected(vec![0x43, 0x00])
        );
    }
}
