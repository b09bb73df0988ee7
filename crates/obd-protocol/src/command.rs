//! ELM327 command frames
//!
//! Every command is ASCII, terminated by a carriage-return.

use crate::mode;

/// Carriage-return, ends every command and answer line
pub const CR: u8 = b'\r';
/// Prompt byte emitted when the adapter is ready for a new command
pub const PROMPT: u8 = b'>';

/// Command that does nothing, used to probe the link
pub const AT_NOOP: &[u8] = b"ATH\r";
/// Warm start, keeps user settings
pub const AT_WARM_START: &[u8] = b"ATWS\r";
/// Restore defaults; on some V1.5 clones `ATWS` drops the custom baud rate but this does not
pub const AT_DEFAULTS: &[u8] = b"ATD\r";
/// Echo off
pub const AT_ECHO_OFF: &[u8] = b"ATE0\r";
/// No linefeed after carriage-return
pub const AT_LINEFEED_OFF: &[u8] = b"ATL0\r";
/// No spaces between bytes in answers
pub const AT_SPACES_OFF: &[u8] = b"ATS0\r";
/// Baud rate handshake timeout set to zero
pub const AT_BRT_ZERO: &[u8] = b"ATBRT00\r";
/// Baud rate handshake timeout back to its default
pub const AT_BRT_DEFAULT: &[u8] = b"ATBRT0F\r";
/// Bus initiation request (supported PIDs 01-20)
pub const BUS_INIT: &[u8] = b"0100\r";

/// Clock the adapter divides to derive its serial baud rate
const BRD_CLOCK: f64 = 4_000_000.0;

/// Build the request frame for a current-data PID, e.g. `010C\r`
pub fn pid_command(pid: u8) -> Vec<u8> {
    format!("{:02X}{:02X}\r", mode::CURRENT_DATA, pid).into_bytes()
}

/// Divisor code for `ATBRD`, or `None` when the rate cannot be expressed in one byte
pub fn baud_divisor(baud_rate: u32) -> Option<u8> {
    if baud_rate == 0 {
        return None;
    }
    let divisor = (BRD_CLOCK / f64::from(baud_rate)).round_ties_even();
    if divisor > f64::from(u8::MAX) {
        None
    } else {
        Some(divisor as u8)
    }
}

/// Build the `ATBRDxx` frame for a divisor code
pub fn baud_switch_command(divisor: u8) -> Vec<u8> {
    format!("ATBRD{:02X}\r", divisor).into_bytes()
}

/// Printable form of a frame for logs
pub fn display_frame(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame)
        .trim_end_matches('\r')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pid_command() {
        assert_eq!(pid_command(0x0C), b"010C\r".to_vec());
        assert_eq!(pid_command(0xA6), b"01A6\r".to_vec());
    }

    #[test]
    fn test_baud_divisor() {
        assert_eq!(baud_divisor(500_000), Some(0x08));
        assert_eq!(baud_switch_command(0x08), b"ATBRD08\r".to_vec());
        assert_eq!(baud_divisor(115_200), Some(0x23));
        assert_eq!(baud_divisor(15_000), None);
        assert_eq!(baud_divisor(0), None);
    }

    proptest! {
        #[test]
        fn pid_frame_hex_decodes_to_pid(pid in any::<u8>()) {
            let frame = pid_command(pid);
            prop_assert_eq!(frame.len(), 5);
            prop_assert_eq!(&frame[..2], b"01");
            prop_assert_eq!(frame[4], CR);
            let hex = std::str::from_utf8(&frame[2..4]).unwrap();
            prop_assert_eq!(hex, hex.to_ascii_uppercase());
            prop_assert_eq!(u8::from_str_radix(hex, 16).unwrap(), pid);
        }
    }
}
