//! Byte channel over a serial transport
//!
//! Byte-level reads with a per-read timeout, writes, baud rate changes and
//! input flushing. Every chunk can optionally be traced for diagnostics.

use crate::command::display_frame;
use crate::error::ObdError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Timeout applied while the adapter dialog is in its idle rhythm
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest chunk read when flushing a desynchronized stream
const DRAIN_CHUNK: usize = 255;

/// A byte stream whose line settings can be changed while open
pub trait SerialTransport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Change the line speed
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ObdError>;

    /// Discard everything received but not read yet
    fn clear_input(&mut self) -> Result<(), ObdError>;
}

impl SerialTransport for SerialStream {
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ObdError> {
        SerialPort::set_baud_rate(self, baud_rate)?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), ObdError> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Opens transports for a port name
pub trait Connector: Send {
    /// Transport produced by this connector
    type Transport: SerialTransport;

    /// Open `port` at `baud_rate`
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<Self::Transport, ObdError>;
}

/// Opens real serial ports: 8 data bits, no parity, one stop bit, no flow control
#[derive(Debug, Default, Clone)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Transport = SerialStream;

    fn open(&mut self, port: &str, baud_rate: u32) -> Result<SerialStream, ObdError> {
        info!("New connection to {}...", port);
        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        #[cfg(unix)]
        stream.set_exclusive(true)?;
        Ok(stream)
    }
}

/// Byte-level tracing switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceFlags {
    /// Log every written frame
    pub sent: bool,
    /// Log every received chunk (and read timeouts)
    pub received: bool,
}

/// Serial link to the adapter with the engine's current line settings
pub struct ByteChannel<T> {
    transport: T,
    baud_rate: u32,
    timeout: Duration,
    idle_timeout: Duration,
    trace: TraceFlags,
}

impl<T: SerialTransport> ByteChannel<T> {
    /// Wrap an opened transport running at `baud_rate`
    pub fn new(transport: T, baud_rate: u32) -> Self {
        Self {
            transport,
            baud_rate,
            timeout: DEFAULT_READ_TIMEOUT,
            idle_timeout: DEFAULT_READ_TIMEOUT,
            trace: TraceFlags::default(),
        }
    }

    /// Current line speed
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Change the line speed
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ObdError> {
        debug!("Serial line speed {} -> {} b/s", self.baud_rate, baud_rate);
        self.transport.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    /// Current per-read timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the per-read timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Change the idle timeout; the current timeout follows it
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = timeout;
        self.timeout = timeout;
    }

    /// Go back to the idle timeout
    pub fn restore_idle_timeout(&mut self) {
        self.timeout = self.idle_timeout;
    }

    /// Set byte-level tracing
    pub fn set_trace(&mut self, trace: TraceFlags) {
        self.trace = trace;
    }

    /// Discard stale input left over from a previous exchange
    pub fn reset_input(&mut self) -> Result<(), ObdError> {
        self.transport.clear_input()
    }

    /// Write a complete frame
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ObdError> {
        if self.trace.sent {
            info!("    PC : {}", display_frame(data));
        }
        self.transport.write_all(data).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Read one byte, `None` when nothing arrived within the timeout
    pub async fn read_byte(&mut self) -> Result<Option<u8>, ObdError> {
        let mut buf = [0u8; 1];
        Ok(self.read_chunk(&mut buf).await?.map(|_| buf[0]))
    }

    /// Read whatever is left (up to a bounded amount) until the line goes quiet
    pub async fn drain(&mut self) -> Result<usize, ObdError> {
        let mut buf = [0u8; DRAIN_CHUNK];
        let mut total = 0;
        while total < DRAIN_CHUNK {
            match self.read_chunk(&mut buf[..DRAIN_CHUNK - total]).await? {
                Some(n) => total += n,
                None => break,
            }
        }
        debug!("Flushed {} bytes", total);
        Ok(total)
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ObdError> {
        match tokio::time::timeout(self.timeout, self.transport.read(buf)).await {
            Ok(Ok(0)) => Err(ObdError::PortClosed),
            Ok(Ok(n)) => {
                if self.trace.received {
                    info!("ELM327 : {}", String::from_utf8_lossy(&buf[..n]));
                }
                Ok(Some(n))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                if self.trace.received {
                    info!("ELM327 : <timeout>");
                }
                Ok(None)
            }
        }
    }
}
