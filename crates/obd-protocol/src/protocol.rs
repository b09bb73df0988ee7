//! OBD-II Bus Protocol Selection

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus protocols selectable with `ATSP`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusProtocol {
    /// Automatic protocol detection
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
    /// SAE J1939 CAN (29 bit ID, 250 kbaud)
    SaeJ1939,
    /// User1 CAN (11 bit ID, 125 kbaud)
    UserCan1,
    /// User2 CAN (11 bit ID, 50 kbaud)
    UserCan2,
}

impl BusProtocol {
    const ALL: [BusProtocol; 13] = [
        BusProtocol::Auto,
        BusProtocol::J1850Pwm,
        BusProtocol::J1850Vpw,
        BusProtocol::Iso9141_2,
        BusProtocol::Iso14230_4Kwp,
        BusProtocol::Iso14230_4KwpFast,
        BusProtocol::Iso15765_4Can11bit500,
        BusProtocol::Iso15765_4Can29bit500,
        BusProtocol::Iso15765_4Can11bit250,
        BusProtocol::Iso15765_4Can29bit250,
        BusProtocol::SaeJ1939,
        BusProtocol::UserCan1,
        BusProtocol::UserCan2,
    ];

    /// The single hex digit the adapter uses for this protocol
    pub fn code(&self) -> char {
        match self {
            BusProtocol::Auto => '0',
            BusProtocol::J1850Pwm => '1',
            BusProtocol::J1850Vpw => '2',
            BusProtocol::Iso9141_2 => '3',
            BusProtocol::Iso14230_4Kwp => '4',
            BusProtocol::Iso14230_4KwpFast => '5',
            BusProtocol::Iso15765_4Can11bit500 => '6',
            BusProtocol::Iso15765_4Can29bit500 => '7',
            BusProtocol::Iso15765_4Can11bit250 => '8',
            BusProtocol::Iso15765_4Can29bit250 => '9',
            BusProtocol::SaeJ1939 => 'A',
            BusProtocol::UserCan1 => 'B',
            BusProtocol::UserCan2 => 'C',
        }
    }

    fn from_code(code: char) -> Option<Self> {
        let code = code.to_ascii_uppercase();
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

impl Default for BusProtocol {
    fn default() -> Self {
        BusProtocol::Auto
    }
}

/// Protocol selection as sent with `ATSP`: a protocol, optionally with
/// automatic fallback (`ATSPA6` tries 6 first, then searches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolSelector {
    /// Preferred protocol
    pub protocol: BusProtocol,
    /// Search other protocols when the preferred one fails
    pub fallback: bool,
}

impl ProtocolSelector {
    /// Select a protocol without fallback
    pub fn exact(protocol: BusProtocol) -> Self {
        Self {
            protocol,
            fallback: false,
        }
    }

    /// The complete `ATSP` command, carriage-return terminated
    pub fn command(&self) -> Vec<u8> {
        format!("ATSP{}\r", self).into_bytes()
    }
}

impl fmt::Display for ProtocolSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fallback {
            write!(f, "A{}", self.protocol.code())
        } else {
            write!(f, "{}", self.protocol.code())
        }
    }
}

impl std::str::FromStr for ProtocolSelector {
    type Err = ObdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let selector = match (chars.next(), chars.next(), chars.next()) {
            (Some(code), None, None) => BusProtocol::from_code(code).map(ProtocolSelector::exact),
            (Some('A' | 'a'), Some(code), None) => {
                BusProtocol::from_code(code).map(|protocol| ProtocolSelector {
                    protocol,
                    fallback: true,
                })
            }
            _ => None,
        };
        selector.ok_or_else(|| ObdError::UnsupportedProtocol(trimmed.to_string()))
    }
}

impl TryFrom<String> for ProtocolSelector {
    type Error = ObdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolSelector> for String {
    fn from(selector: ProtocolSelector) -> Self {
        selector.to_string()
    }
}
