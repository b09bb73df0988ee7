//! Adapter handshake
//!
//! Brings the adapter from an unknown state to a known configuration:
//! link probing at either baud rate, reset, echo/linefeed/spaces off,
//! bus protocol selection and finally the optional switch to the
//! desired baud rate. Every step must end with the prompt.

use crate::channel::{ByteChannel, SerialTransport};
use crate::command::{
    self, baud_divisor, baud_switch_command, display_frame, CR, PROMPT,
};
use crate::error::ObdError;
use crate::framing::PROMPT_SCAN_LIMIT;
use crate::protocol::ProtocolSelector;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read timeout while the adapter resets
pub const RESET_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout while waiting for the baud switch acknowledgment
pub const BAUD_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes examined at each stage of the baud switch
const BAUD_SWITCH_SCAN_LIMIT: usize = 8;

/// Identity the adapter announces at the new baud rate
const IDENTITY: [u8; 6] = *b"ELM327";

/// What the handshake needs from the connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeSettings {
    /// Baud rate the adapter starts with
    pub initial_baud_rate: u32,
    /// Baud rate to switch to
    pub desired_baud_rate: u32,
    /// Fail the handshake when the desired baud rate cannot be applied
    pub force_desired_baud_rate: bool,
    /// Bus protocol selection
    pub protocol: ProtocolSelector,
}

/// Why the baud rate stayed unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudSwitchFailure {
    /// The divisor does not fit in one byte
    Unrepresentable,
    /// The chip answered `?`
    Unsupported,
    /// No identity or terminator at the new baud rate
    NoIdentity,
}

/// Outcome of the baud switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudSwitch {
    /// The link runs at the desired baud rate
    Applied,
    /// The link stayed at its previous baud rate
    NotApplied(BaudSwitchFailure),
}

/// Tracks which identity characters were seen, in any order
#[derive(Debug, Default)]
struct IdentityFlags([bool; IDENTITY.len()]);

impl IdentityFlags {
    /// Returns false when the byte is not part of the identity
    fn mark(&mut self, byte: u8) -> bool {
        match IDENTITY.iter().position(|&c| c == byte) {
            Some(i) => {
                self.0[i] = true;
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.0 = [false; IDENTITY.len()];
    }

    fn complete(&self) -> bool {
        self.0.iter().all(|&seen| seen)
    }
}

/// Runs the handshake over a borrowed channel
pub struct Handshake<'a, T> {
    channel: &'a mut ByteChannel<T>,
    settings: HandshakeSettings,
}

impl<'a, T: SerialTransport> Handshake<'a, T> {
    /// Prepare a handshake
    pub fn new(channel: &'a mut ByteChannel<T>, settings: HandshakeSettings) -> Self {
        Self { channel, settings }
    }

    /// Run every step. `on_retry` may refresh the settings between probes.
    pub async fn establish<F>(&mut self, on_retry: F) -> Result<BaudSwitch, ObdError>
    where
        F: FnMut(&mut HandshakeSettings),
    {
        self.discover(on_retry).await?;
        self.reset().await?;
        self.configure().await?;
        let outcome = self.apply_desired_baud_rate().await?;
        if outcome != BaudSwitch::Applied && self.settings.force_desired_baud_rate {
            return Err(ObdError::BaudRateUnavailable(self.settings.desired_baud_rate));
        }
        Ok(outcome)
    }

    /// Probe the link until the adapter answers, alternating between the
    /// initial and desired baud rates. There is no attempt cap: the link
    /// state is unknown on entry.
    pub async fn discover<F>(&mut self, mut on_retry: F) -> Result<u32, ObdError>
    where
        F: FnMut(&mut HandshakeSettings),
    {
        info!("Contacting the ELM327 chip...");
        loop {
            self.channel.write(command::AT_NOOP).await?;
            if self.channel.await_prompt(PROMPT_SCAN_LIMIT).await? {
                break;
            }
            on_retry(&mut self.settings);
            let next = if self.channel.baud_rate() == self.settings.initial_baud_rate {
                self.settings.desired_baud_rate
            } else {
                self.settings.initial_baud_rate
            };
            debug!("No prompt, trying {} b/s", next);
            self.channel.set_baud_rate(next)?;
        }
        info!("Connection works at {} b/s", self.channel.baud_rate());
        Ok(self.channel.baud_rate())
    }

    /// Reset the adapter, keeping the custom baud rate when already using it
    pub async fn reset(&mut self) -> Result<(), ObdError> {
        if self.channel.baud_rate() == self.settings.desired_baud_rate {
            self.channel.write(command::AT_DEFAULTS).await?;
        } else {
            self.channel.write(command::AT_WARM_START).await?;
        }
        self.channel.set_timeout(RESET_TIMEOUT);
        self.channel.expect_prompt("ATWS or ATD").await
    }

    /// Echo, linefeeds and spaces off, then select the bus protocol
    pub async fn configure(&mut self) -> Result<(), ObdError> {
        self.channel.write(command::AT_ECHO_OFF).await?;
        self.channel.expect_prompt("ATE0").await?;
        self.channel.write(command::AT_LINEFEED_OFF).await?;
        self.channel.expect_prompt("ATL0").await?;
        self.channel.write(command::AT_SPACES_OFF).await?;
        self.channel.expect_prompt("ATS0").await?;
        self.channel.write(&self.settings.protocol.command()).await?;
        self.channel.expect_prompt("ATSP").await
    }

    /// Switch the link to the desired baud rate if it isn't already there
    pub async fn apply_desired_baud_rate(&mut self) -> Result<BaudSwitch, ObdError> {
        let desired = self.settings.desired_baud_rate;
        if self.channel.baud_rate() == desired {
            return Ok(BaudSwitch::Applied);
        }
        let Some(divisor) = baud_divisor(desired) else {
            warn!("Baud rate {} b/s cannot be requested from the chip", desired);
            return Ok(BaudSwitch::NotApplied(BaudSwitchFailure::Unrepresentable));
        };
        let switch_command = baud_switch_command(divisor);
        info!("Switching baud rate ({})...", display_frame(&switch_command));

        self.channel.write(command::AT_BRT_ZERO).await?;
        self.channel.expect_prompt("ATBRT00").await?;
        self.channel.write(&switch_command).await?;
        self.channel.set_timeout(BAUD_ACK_TIMEOUT);

        if !self.await_acknowledgment(&switch_command).await? {
            return Ok(BaudSwitch::NotApplied(BaudSwitchFailure::Unsupported));
        }

        self.channel.set_baud_rate(desired)?;
        if !self.confirm_identity().await? {
            warn!("The communication did not work after applying the desired baudrate!");
            self.channel.set_baud_rate(self.settings.initial_baud_rate)?;
            self.channel.await_prompt(PROMPT_SCAN_LIMIT).await?;
            self.channel.restore_idle_timeout();
            return Ok(BaudSwitch::NotApplied(BaudSwitchFailure::NoIdentity));
        }

        self.channel.write(&[CR]).await?;
        self.channel.restore_idle_timeout();
        self.channel.expect_prompt("setting the desired baudrate").await?;
        self.channel.write(command::AT_BRT_DEFAULT).await?;
        self.channel.expect_prompt("ATBRT0F").await?;
        Ok(BaudSwitch::Applied)
    }

    /// Wait for `OK`. Returns false when the chip rejected the command.
    async fn await_acknowledgment(&mut self, switch_command: &[u8]) -> Result<bool, ObdError> {
        let mut received_o = false;
        for _ in 0..BAUD_SWITCH_SCAN_LIMIT {
            match self.channel.read_byte().await? {
                None | Some(PROMPT) => {
                    return Err(ObdError::InvalidAnswer(
                        "no answer or invalid answer while applying the desired baudrate".into(),
                    ));
                }
                Some(b'?') => {
                    warn!(
                        "This chip version does not support changing the serial link bitrate, or wrong argument in {}.",
                        display_frame(switch_command)
                    );
                    self.channel.restore_idle_timeout();
                    if !self.channel.await_prompt(PROMPT_SCAN_LIMIT).await? {
                        warn!("No prompt after unsupported ATBRD!");
                    }
                    return Ok(false);
                }
                Some(b'O') => received_o = true,
                Some(b'K') if received_o => return Ok(true),
                Some(b'K') => {}
                Some(_) => received_o = false,
            }
        }
        Err(ObdError::InvalidAnswer(
            "no OK while applying the desired baudrate".into(),
        ))
    }

    /// Look for the identity and its terminating carriage-return at the new rate
    async fn confirm_identity(&mut self) -> Result<bool, ObdError> {
        let mut flags = IdentityFlags::default();
        let mut identified = false;
        for _ in 0..BAUD_SWITCH_SCAN_LIMIT {
            let Some(byte) = self.channel.read_byte().await? else {
                break;
            };
            if byte == IDENTITY[IDENTITY.len() - 1] {
                flags.mark(byte);
                if flags.complete() {
                    identified = true;
                } else {
                    self.channel.await_prompt(PROMPT_SCAN_LIMIT).await?;
                    self.channel.restore_idle_timeout();
                }
                break;
            }
            if !flags.mark(byte) {
                flags.clear();
            }
        }
        if !identified {
            return Ok(false);
        }
        for _ in 0..BAUD_SWITCH_SCAN_LIMIT {
            if self.channel.read_byte().await? == Some(CR) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
