//! Byte-level serial seam shared by the modem channel and the ESP32 link.

use crate::error::CheckError;
use anyhow::{Context, Result};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Minimal duplex byte stream. Reads never wait for data that has not arrived yet.
pub trait ByteTransport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Append every byte currently buffered to `buf`; returns how many were added.
    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Drop unread input.
    fn clear_input(&mut self) -> Result<()>;

    fn name(&self) -> &str;
}

/// `serialport`-backed transport, 8N1 without flow control.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let mut port = serialport::new(path, baud)
            .timeout(timeout)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|err| CheckError::Connection {
                port: path.to_string(),
                reason: err.to_string(),
            })?;
        // Some USB bridges hold the device in reset until DTR/RTS are asserted.
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        Ok(Self {
            name: path.to_string(),
            port,
        })
    }

    /// Names of serial ports the OS reports, for diagnostics.
    pub fn available_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports().context("failed to enumerate serial ports")?;
        Ok(ports.into_iter().map(|info| info.port_name).collect())
    }
}

impl ByteTransport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .with_context(|| format!("write to {} failed", self.name))?;
        self.port
            .flush()
            .with_context(|| format!("flush of {} failed", self.name))
    }

    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let pending = self
            .port
            .bytes_to_read()
            .with_context(|| format!("failed to query {} input", self.name))?
            as usize;
        if pending == 0 {
            return Ok(0);
        }
        let start = buf.len();
        buf.resize(start + pending, 0);
        match self.port.read(&mut buf[start..]) {
            Ok(read) => {
                buf.truncate(start + read);
                Ok(read)
            }
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                buf.truncate(start);
                Ok(0)
            }
            Err(err) => {
                buf.truncate(start);
                Err(err).with_context(|| format!("read from {} failed", self.name))
            }
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .with_context(|| format!("failed to clear {} input", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
