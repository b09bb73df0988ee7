//! Polling Scheduler Implementation
//!
//! Requests every PID of the sequence in order, one round after another,
//! and counts consecutive unanswered requests to detect a dead link.

use crate::config::PollTimeouts;
use crate::dispatch::{Dispatch, ResponseDispatcher};
use crate::error::RelayError;
use crate::registry::PidRegistry;
use obd_protocol::command::BUS_INIT;
use obd_protocol::{ByteChannel, SerialTransport, ANSWER_SCAN_LIMIT, PROMPT_SCAN_LIMIT};
use tracing::{debug, info, warn};

/// Outcome counts of one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Requests that got any answer
    pub answered: usize,
    /// Requests that timed out
    pub unanswered: usize,
    /// STOPPED answers that triggered a bus initiation
    pub stopped: usize,
}

/// Round-robin PID poller for one connection
#[derive(Debug)]
pub struct PollingScheduler {
    dispatcher: ResponseDispatcher,
    straight_errors: usize,
    rounds: u64,
    first_request: bool,
    last_pid: Option<u8>,
}

impl PollingScheduler {
    pub fn new(show_incorrect_result: bool) -> Self {
        Self {
            dispatcher: ResponseDispatcher::new(show_incorrect_result),
            straight_errors: 0,
            rounds: 0,
            first_request: true,
            last_pid: None,
        }
    }

    /// Give the first request the negotiation timeout: the adapter talks
    /// to the bus for the first time
    pub fn prepare<T: SerialTransport>(&mut self, channel: &mut ByteChannel<T>, timeouts: PollTimeouts) {
        channel.set_timeout(timeouts.negotiation);
        self.first_request = true;
    }

    /// Switch to reloaded timeouts. The first request keeps the negotiation
    /// timeout until it is answered.
    pub fn update_timeouts<T: SerialTransport>(&mut self, channel: &mut ByteChannel<T>, timeouts: PollTimeouts) {
        if self.first_request {
            channel.set_timeout(timeouts.negotiation);
        } else {
            channel.set_timeout(timeouts.request);
        }
    }

    pub fn set_show_incorrect_result(&mut self, show: bool) {
        self.dispatcher.set_show_incorrect_result(show);
    }

    /// Consecutive requests without an answer, across rounds
    pub fn straight_errors(&self) -> usize {
        self.straight_errors
    }

    /// Completed rounds
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn complete_round(&mut self) {
        self.rounds += 1;
    }

    /// PID most recently requested
    pub fn last_pid(&self) -> Option<u8> {
        self.last_pid
    }

    /// Request every PID of the sequence once
    pub async fn run_round<T: SerialTransport>(
        &mut self,
        channel: &mut ByteChannel<T>,
        registry: &mut PidRegistry,
        timeouts: PollTimeouts,
    ) -> Result<RoundReport, RelayError> {
        let mut report = RoundReport::default();
        let sequence = registry.sequence().to_vec();
        for pid in sequence {
            let Some(command) = registry.command(pid).map(<[u8]>::to_vec) else {
                continue;
            };
            channel.reset_input()?;
            channel.write(&command).await?;
            self.last_pid = Some(pid);

            match channel.read_answer(ANSWER_SCAN_LIMIT).await? {
                None => {
                    self.straight_errors += 1;
                    report.unanswered += 1;
                    debug!(
                        "No answer for PID 0x{:02X} ({} in a row)",
                        pid, self.straight_errors
                    );
                }
                Some(line) => {
                    self.straight_errors = 0;
                    report.answered += 1;
                    if self.dispatcher.dispatch(registry, &line, self.last_pid) == Dispatch::Stopped {
                        report.stopped += 1;
                        self.restart_bus(channel, timeouts).await?;
                    }
                }
            }

            if self.first_request {
                self.first_request = false;
                channel.set_timeout(timeouts.request);
            }
        }
        Ok(report)
    }

    /// Fail once a full sequence length of requests went unanswered.
    /// An empty sequence can never succeed and fails at once.
    pub fn check_link(&self, sequence_len: usize) -> Result<(), RelayError> {
        if self.straight_errors >= sequence_len {
            return Err(RelayError::LinkLost(self.straight_errors));
        }
        Ok(())
    }

    async fn restart_bus<T: SerialTransport>(
        &mut self,
        channel: &mut ByteChannel<T>,
        timeouts: PollTimeouts,
    ) -> Result<(), RelayError> {
        info!("Received a STOPPED alert");
        channel.write(BUS_INIT).await?;
        channel.set_timeout(timeouts.negotiation);
        if !channel.await_prompt(PROMPT_SCAN_LIMIT).await? {
            warn!("Prompt not received after STOPPED!");
        }
        channel.set_timeout(timeouts.request);
        Ok(())
    }
}
