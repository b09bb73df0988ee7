//! Simulated ELM327 adapter
//!
//! Speaks enough of the AT dialect to run the full handshake and polling
//! loop without hardware: echo and spaces flags, resets, `ATBRD` baud
//! switching with identity announcement, and configurable answers per PID.
//! Bytes exchanged while host and adapter disagree on the baud rate are lost.
//! Answers take their time on the wire (10 bits per byte) so a polling loop
//! against the simulator is paced like one against real hardware.

use crate::channel::{Connector, SerialTransport};
use crate::command::{CR, PROMPT};
use crate::error::ObdError;
use crate::pid::STOPPED;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

/// Port name that selects the simulated adapter
pub const SIM_PORT: &str = "sim";

/// How long the adapter waits for the confirmation after announcing itself at a new baud rate
const BAUD_CONFIRM_WINDOW: Duration = Duration::from_millis(75);

/// Time the adapter spends on the vehicle bus before answering a PID request
const BUS_LATENCY: Duration = Duration::from_millis(5);

/// Answer to the bus initiation request when none is configured
const DEFAULT_BUS_INIT_ANSWER: &str = "4100BE3EB811";

type Chunk = (u32, Vec<u8>);

/// The host side of the link went away
#[derive(Debug)]
struct LinkClosed;

/// Behaviour of the simulated adapter
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Baud rate the adapter listens on at power-on
    pub baud_rate: u32,
    /// Whether `ATBRD` is implemented
    pub supports_baud_switch: bool,
    /// Announced after a reset and after a baud switch
    pub identity: String,
    /// Answer line (hex, no spaces) per PID; other PIDs get `NO DATA`
    pub answers: HashMap<u8, String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let answers = [
            (0x0C, "410C1AF8"),
            (0x0D, "410D55"),
            (0x05, "41057B"),
            (0x04, "410480"),
            (0x10, "411001F4"),
        ]
        .into_iter()
        .map(|(pid, answer)| (pid, answer.to_string()))
        .collect();
        Self {
            baud_rate: 38_400,
            supports_baud_switch: true,
            identity: "ELM327 v1.5".to_string(),
            answers,
        }
    }
}

#[derive(Debug)]
struct AdapterState {
    config: SimConfig,
    baud_rate: u32,
    echo: bool,
    spaces: bool,
    silent: bool,
    stopped_remaining: usize,
    commands: Vec<String>,
}

/// Control and inspection of a running simulated adapter
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<AdapterState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every command the adapter understood, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Forget the recorded commands
    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Baud rate the adapter currently listens on
    pub fn baud_rate(&self) -> u32 {
        self.lock().baud_rate
    }

    /// Stop answering PID requests, as if the bus went away
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Change the answer for one PID
    pub fn set_answer(&self, pid: u8, answer: &str) {
        self.lock().config.answers.insert(pid, answer.to_string());
    }

    /// Answer the next `count` PID requests with `STOPPED`
    pub fn queue_stopped(&self, count: usize) {
        self.lock().stopped_remaining = count;
    }
}

/// Host side of the simulated serial link
#[derive(Debug)]
pub struct SimTransport {
    baud_rate: u32,
    to_adapter: UnboundedSender<Chunk>,
    from_adapter: UnboundedReceiver<Chunk>,
    pending: VecDeque<u8>,
}

impl SerialTransport for SimTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ObdError> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), ObdError> {
        self.pending.clear();
        while self.from_adapter.try_recv().is_ok() {}
        Ok(())
    }
}

impl AsyncRead for SimTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        while this.pending.is_empty() {
            match this.from_adapter.poll_recv(cx) {
                Poll::Ready(Some((baud_rate, bytes))) => {
                    if baud_rate == this.baud_rate {
                        this.pending.extend(bytes);
                    }
                }
                // Adapter gone: end of stream
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = buf.remaining().min(this.pending.len());
        let chunk: Vec<u8> = this.pending.drain(..n).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SimTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.to_adapter.send((self.baud_rate, buf.to_vec())) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated adapter stopped",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Opens links to one persistent simulated adapter.
///
/// The adapter keeps its state (baud rate included) across reconnects.
#[derive(Debug, Clone)]
pub struct SimConnector {
    handle: SimHandle,
}

impl SimConnector {
    /// Power on a simulated adapter
    pub fn new(config: SimConfig) -> Self {
        let state = AdapterState {
            baud_rate: config.baud_rate,
            config,
            echo: true,
            spaces: true,
            silent: false,
            stopped_remaining: 0,
            commands: Vec::new(),
        };
        Self {
            handle: SimHandle {
                state: Arc::new(Mutex::new(state)),
            },
        }
    }

    /// Handle on the adapter
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl Connector for SimConnector {
    type Transport = SimTransport;

    fn open(&mut self, port: &str, baud_rate: u32) -> Result<SimTransport, ObdError> {
        info!("New connection to simulated adapter {}...", port);
        let (host_tx, adapter_rx) = unbounded_channel();
        let (adapter_tx, host_rx) = unbounded_channel();
        let adapter = SimAdapter {
            handle: self.handle.clone(),
            rx: adapter_rx,
            tx: adapter_tx,
        };
        tokio::spawn(adapter.run());
        Ok(SimTransport {
            baud_rate,
            to_adapter: host_tx,
            from_adapter: host_rx,
            pending: VecDeque::new(),
        })
    }
}

/// Adapter side of one link; ends when the host drops its transport
struct SimAdapter {
    handle: SimHandle,
    rx: UnboundedReceiver<Chunk>,
    tx: UnboundedSender<Chunk>,
}

impl SimAdapter {
    async fn run(mut self) {
        let mut line = Vec::new();
        while let Some((host_baud, bytes)) = self.rx.recv().await {
            if host_baud != self.handle.baud_rate() {
                // Garbled at the wrong rate
                line.clear();
                continue;
            }
            for byte in bytes {
                match byte {
                    CR => {
                        let command = String::from_utf8_lossy(&line).to_ascii_uppercase();
                        line.clear();
                        if !command.is_empty() && self.handle_command(&command).await.is_err() {
                            return;
                        }
                    }
                    b' ' | b'\n' => {}
                    _ => line.push(byte),
                }
            }
        }
        debug!("Simulated adapter link closed");
    }

    async fn send(&self, baud_rate: u32, text: &str) -> Result<(), LinkClosed> {
        tokio::time::sleep(line_time(baud_rate, text.len())).await;
        self.tx
            .send((baud_rate, text.as_bytes().to_vec()))
            .map_err(|_| LinkClosed)
    }

    /// Answer `body`, echoing the command first when echo is on
    async fn reply(&self, command: &str, echo: bool, body: &str) -> Result<(), LinkClosed> {
        let baud_rate = self.handle.baud_rate();
        let mut text = String::new();
        if echo {
            text.push_str(command);
            text.push(CR as char);
        }
        text.push_str(body);
        text.push_str("\r\r");
        text.push(PROMPT as char);
        self.send(baud_rate, &text).await
    }

    async fn handle_command(&mut self, command: &str) -> Result<(), LinkClosed> {
        let (echo, spaces, identity) = {
            let mut state = self.handle.lock();
            state.commands.push(command.to_string());
            (state.echo, state.spaces, state.config.identity.clone())
        };

        if let Some(pid) = command.strip_prefix("01") {
            return self.answer_request(command, pid, echo, spaces).await;
        }

        let body = match command {
            "ATWS" | "ATZ" => {
                let mut state = self.handle.lock();
                state.echo = true;
                state.spaces = true;
                format!("\r\r{}", identity)
            }
            "ATD" => {
                let mut state = self.handle.lock();
                state.echo = true;
                state.spaces = true;
                "OK".to_string()
            }
            "ATE0" | "ATE1" => {
                self.handle.lock().echo = command == "ATE1";
                "OK".to_string()
            }
            "ATS0" | "ATS1" => {
                self.handle.lock().spaces = command == "ATS1";
                "OK".to_string()
            }
            "ATI" => identity,
            _ if command.starts_with("ATBRD") => {
                return self.switch_baud_rate(command, echo, &identity).await;
            }
            _ if command.starts_with("ATH")
                || command.starts_with("ATL")
                || command.starts_with("ATSP")
                || command.starts_with("ATBRT") =>
            {
                "OK".to_string()
            }
            _ => "?".to_string(),
        };
        self.reply(command, echo, &body).await
    }

    async fn answer_request(&self, command: &str, pid: &str, echo: bool, spaces: bool) -> Result<(), LinkClosed> {
        let answer = {
            let mut state = self.handle.lock();
            if state.silent {
                return Ok(());
            }
            if state.stopped_remaining > 0 {
                state.stopped_remaining -= 1;
                Some(STOPPED.to_string())
            } else {
                match u8::from_str_radix(pid, 16) {
                    Ok(0x00) => Some(
                        state
                            .config
                            .answers
                            .get(&0x00)
                            .cloned()
                            .unwrap_or_else(|| DEFAULT_BUS_INIT_ANSWER.to_string()),
                    ),
                    Ok(pid) => state.config.answers.get(&pid).cloned(),
                    Err(_) => None,
                }
            }
        };
        let body = match answer {
            Some(line) if spaces && line != STOPPED => spaced(&line),
            Some(line) => line,
            None => "NO DATA".to_string(),
        };
        tokio::time::sleep(BUS_LATENCY).await;
        self.reply(command, echo, &body).await
    }

    async fn switch_baud_rate(&mut self, command: &str, echo: bool, identity: &str) -> Result<(), LinkClosed> {
        let (supported, old_rate) = {
            let state = self.handle.lock();
            (state.config.supports_baud_switch, state.baud_rate)
        };
        let divisor = u8::from_str_radix(&command[5..], 16).ok().filter(|&d| d > 0);
        let Some(divisor) = divisor.filter(|_| supported) else {
            return self.reply(command, echo, "?").await;
        };
        let new_rate = (4_000_000.0 / f64::from(divisor)).round() as u32;

        let mut ack = String::new();
        if echo {
            ack.push_str(command);
            ack.push(CR as char);
        }
        ack.push_str("OK\r");
        self.send(old_rate, &ack).await?;

        self.handle.lock().baud_rate = new_rate;
        self.send(new_rate, &format!("{}\r", identity)).await?;

        let confirmed = match tokio::time::timeout(BAUD_CONFIRM_WINDOW, self.rx.recv()).await {
            Ok(Some((baud_rate, bytes))) => baud_rate == new_rate && bytes.contains(&CR),
            Ok(None) => return Err(LinkClosed),
            Err(_) => false,
        };
        if confirmed {
            debug!("Simulated adapter now at {} b/s", new_rate);
            self.send(new_rate, "\r>").await
        } else {
            debug!("Simulated adapter back to {} b/s", old_rate);
            self.handle.lock().baud_rate = old_rate;
            self.send(old_rate, "\r>").await
        }
    }
}

/// Time to transmit `len` bytes at `baud_rate`, 8N1 framing
fn line_time(baud_rate: u32, len: usize) -> Duration {
    Duration::from_micros(len as u64 * 10_000_000 / u64::from(baud_rate.max(1)))
}

/// Insert a space after every byte pair, as the adapter does with spaces on
fn spaced(hex: &str) -> String {
    let mut out = String::with_capacity(hex.len() * 3 / 2);
    for (i, c) in hex.chars().enumerate() {
        out.push(c);
        if i % 2 == 1 {
            out.push(' ');
        }
    }
    out
}
