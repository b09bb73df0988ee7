//! Prompt-terminated framing
//!
//! The adapter ends every answer with `>` and sends nothing after it.
//! Answers are split into lines on carriage-return; bytes outside
//! 0x01..=0x7F are dropped since some chips emit stray NULs.

use crate::channel::{ByteChannel, SerialTransport};
use crate::command::{CR, PROMPT};
use crate::error::ObdError;

/// Bytes scanned for a prompt before giving up
pub const PROMPT_SCAN_LIMIT: usize = 32;
/// Bytes accepted in one answer before giving up
pub const ANSWER_SCAN_LIMIT: usize = 64;

/// Result of feeding one byte to an [`AnswerAssembler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// More bytes are needed
    Continue,
    /// The prompt closed the answer
    Complete,
}

/// Splits an answer into lines as bytes arrive
#[derive(Debug, Default)]
pub struct AnswerAssembler {
    lines: Vec<String>,
    current: Vec<u8>,
}

impl AnswerAssembler {
    /// Start an empty answer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received byte
    pub fn push(&mut self, byte: u8) -> Feed {
        match byte {
            CR | PROMPT => {
                let line = std::mem::take(&mut self.current);
                self.lines.push(String::from_utf8_lossy(&line).into_owned());
                if byte == PROMPT {
                    Feed::Complete
                } else {
                    Feed::Continue
                }
            }
            0x01..=0x7F => {
                self.current.push(byte);
                Feed::Continue
            }
            _ => Feed::Continue,
        }
    }

    /// The line carrying the answer
    pub fn into_answer(self) -> Option<String> {
        select_answer_line(&self.lines).map(str::to_string)
    }
}

/// Pick the last line longer than one character, else the very last line.
///
/// Single-character lines are protocol noise, not payload.
pub fn select_answer_line(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .rev()
        .find(|line| line.len() > 1)
        .or_else(|| lines.last())
        .map(String::as_str)
}

impl<T: SerialTransport> ByteChannel<T> {
    /// Read until the prompt, then require silence after it.
    ///
    /// Leaves the read timeout at its idle value. Returns `false` on timeout,
    /// when `max_bytes` pass without a prompt, or when a byte follows the prompt.
    pub async fn await_prompt(&mut self, max_bytes: usize) -> Result<bool, ObdError> {
        let mut found = false;
        for _ in 0..max_bytes {
            match self.read_byte().await? {
                None => break,
                Some(PROMPT) => {
                    found = true;
                    break;
                }
                Some(_) => {}
            }
        }
        self.restore_idle_timeout();
        if !found {
            return Ok(false);
        }
        Ok(self.read_byte().await?.is_none())
    }

    /// Like [`await_prompt`](Self::await_prompt) but a missing prompt is a protocol violation
    pub async fn expect_prompt(&mut self, step: &'static str) -> Result<(), ObdError> {
        if self.await_prompt(PROMPT_SCAN_LIMIT).await? {
            Ok(())
        } else {
            Err(ObdError::NoPrompt(step))
        }
    }

    /// Read one answer up to the prompt.
    ///
    /// Returns `None` on timeout or when `max_bytes` pass without a prompt;
    /// in the latter case the stream is flushed to resynchronize.
    pub async fn read_answer(&mut self, max_bytes: usize) -> Result<Option<String>, ObdError> {
        let mut assembler = AnswerAssembler::new();
        for _ in 0..max_bytes {
            let Some(byte) = self.read_byte().await? else {
                return Ok(None);
            };
            if assembler.push(byte) == Feed::Complete {
                return Ok(assembler.into_answer());
            }
        }
        self.drain().await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assemble(bytes: &[u8]) -> (Option<String>, bool) {
        let mut assembler = AnswerAssembler::new();
        let mut complete = false;
        for &b in bytes {
            if assembler.push(b) == Feed::Complete {
                complete = true;
                break;
            }
        }
        (assembler.into_answer(), complete)
    }

    #[test]
    fn test_answer_with_trailing_blank_lines() {
        let (answer, complete) = assemble(b"410C1AF8\r\r>");
        assert!(complete);
        assert_eq!(answer.as_deref(), Some("410C1AF8"));
    }

    #[test]
    fn test_answer_with_spaces() {
        let (answer, _) = assemble(b"41 0C 1A F8 \r>");
        assert_eq!(answer.as_deref(), Some("41 0C 1A F8 "));
    }

    #[test]
    fn test_single_char_lines_are_skipped() {
        let (answer, _) = assemble(b"SEARCHING...\r410D55\rX\r>");
        assert_eq!(answer.as_deref(), Some("410D55"));
    }

    #[test]
    fn test_falls_back_to_last_line() {
        let (answer, _) = assemble(b"?\r>");
        assert_eq!(answer.as_deref(), Some(""));

        let lines = vec!["?".to_string()];
        assert_eq!(select_answer_line(&lines), Some("?"));
    }

    #[test]
    fn test_out_of_range_bytes_dropped() {
        let (answer, _) = assemble(b"41\x000D\xFF55\r>");
        assert_eq!(answer.as_deref(), Some("410D55"));
    }

    #[test]
    fn test_no_lines() {
        assert_eq!(select_answer_line(&[]), None);
    }

    proptest! {
        #[test]
        fn selected_line_is_never_trivial_when_payload_exists(
            payload in "[0-9A-F]{2,16}",
            noise in proptest::collection::vec("[A-Z?]?", 0..4),
        ) {
            let mut bytes = payload.clone().into_bytes();
            bytes.push(CR);
            for n in &noise {
                bytes.extend_from_slice(n.as_bytes());
                bytes.push(CR);
            }
            bytes.push(PROMPT);
            let (answer, complete) = assemble(&bytes);
            prop_assert!(complete);
            prop_assert_eq!(answer, Some(payload));
        }
    }
}
