//! `serialport`-backed transport for real devices.
//!
//! Reads use the configured timeout as their only blocking point: a read
//! that times out is reported as `Ok(0)` so the reader thread can check its
//! shutdown flag and release the session lock between reads.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use super::{LinkSettings, Transport, TransportError, TransportFactory};

/// Native serial port connection.
pub struct SerialTransport {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
    /// How long `disconnect` waits for the OS to release the handle.
    close_wait: Duration,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, close_wait: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            port: None,
            close_wait,
        }
    }

    fn open_port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or_else(|| TransportError::NotOpen {
            port: self.port_name.clone(),
        })
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self, link: &LinkSettings) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Err(TransportError::OpenFailed {
                port: self.port_name.clone(),
                reason: "already open".to_string(),
            });
        }

        let port = serialport::new(&self.port_name, link.baud_rate)
            .timeout(link.read_timeout)
            .open()
            .map_err(|e| open_error(&self.port_name, e))?;

        info!("opened {} at {} baud", self.port_name, link.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let name = self.port_name.clone();
        let port = self.open_port()?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_idle(&e) => Ok(0),
            Err(e) => Err(read_error(&name, e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let name = self.port_name.clone();
        let port = self.open_port()?;
        port.write_all(bytes)
            .and_then(|()| port.flush())
            .map_err(|e| write_error(&name, e))
    }

    fn disconnect(&mut self) {
        if let Some(port) = self.port.take() {
            drop(port);
            debug!("released {}", self.port_name);
            if !self.close_wait.is_zero() {
                std::thread::sleep(self.close_wait);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

/// Builds [`SerialTransport`]s for the registry.
#[derive(Debug, Clone)]
pub struct SerialTransportFactory {
    close_wait: Duration,
}

impl SerialTransportFactory {
    pub fn new(close_wait: Duration) -> Self {
        Self { close_wait }
    }
}

impl TransportFactory for SerialTransportFactory {
    fn create(&self, port: &str) -> Box<dyn Transport> {
        Box::new(SerialTransport::new(port, self.close_wait))
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

/// Timeouts and interruptions just mean "no data yet".
fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn open_error(port: &str, e: serialport::Error) -> TransportError {
    let port = port.to_string();
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::DeviceNotFound { port },
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            TransportError::DeviceNotFound { port }
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied { port }
        }
        serialport::ErrorKind::InvalidInput => TransportError::Unsupported {
            port,
            reason: e.description,
        },
        _ => TransportError::OpenFailed {
            port,
            reason: e.description,
        },
    }
}

fn read_error(port: &str, e: io::Error) -> TransportError {
    let port = port.to_string();
    match e.kind() {
        // A vanished USB adapter surfaces as one of these mid-stream.
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => {
            TransportError::DeviceNotFound { port }
        }
        io::ErrorKind::PermissionDenied => TransportError::PermissionDenied { port },
        _ => TransportError::Read { port, source: e },
    }
}

fn write_error(port: &str, e: io::Error) -> TransportError {
    let port = port.to_string();
    match e.kind() {
        io::ErrorKind::TimedOut => TransportError::Timeout { port },
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => {
            TransportError::DeviceNotFound { port }
        }
        io::ErrorKind::PermissionDenied => TransportError::PermissionDenied { port },
        _ => TransportError::Write { port, source: e },
    }
}
