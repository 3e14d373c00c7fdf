//! Byte transport infrastructure.
//!
//! A [`Transport`] is one physical (or simulated) serial connection: it can
//! be connected, read from in chunks, written to, and released.  The
//! production implementation in [`serial`] wraps the `serialport` crate;
//! [`mock`] provides a scripted transport for tests.
//!
//! # Testability
//!
//! Sessions and the registry only see the trait, so every framing and
//! lifecycle scenario can be exercised without hardware attached.

use std::time::Duration;

use thiserror::Error;

pub mod mock;
pub mod serial;

/// Transport-level failures, one variant per condition.
///
/// Each message names the port so it can be shown to the user as-is.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device does not exist (never plugged in, or removed).
    #[error("device {port} not found")]
    DeviceNotFound { port: String },

    /// The OS refused access to the device.
    #[error("permission error on {port}")]
    PermissionDenied { port: String },

    /// The device exists but could not be opened.
    #[error("error opening {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// Reading from an open device failed.
    #[error("read error on {port}: {source}")]
    Read {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing to an open device failed.
    #[error("write error on {port}: {source}")]
    Write {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// A write did not complete within the port timeout.
    #[error("timeout on {port}")]
    Timeout { port: String },

    /// The operation needs an open connection.
    #[error("{port} is not open")]
    NotOpen { port: String },

    /// The device or driver does not support the requested operation.
    #[error("unsupported operation on {port}: {reason}")]
    Unsupported { port: String, reason: String },
}

/// Connection parameters a transport needs to open a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Upper bound for a single blocking read.
    pub read_timeout: Duration,
}

/// One serial connection.
///
/// Implementations are driven from a single thread at a time (the owning
/// session is behind a mutex), so methods take `&mut self`.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Opens the device.  Calling it on an open transport is an error.
    fn connect(&mut self, link: &LinkSettings) -> Result<(), TransportError>;

    /// Reads whatever is available into `buf`, waiting at most the read
    /// timeout.  `Ok(0)` means nothing arrived in time.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes all of `bytes` and flushes.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Releases the device.  Idempotent.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Creates transports by port name.
///
/// The registry uses a factory so it can build a fresh session whenever a
/// port is opened for the first time.
pub trait TransportFactory: Send {
    fn create(&self, port: &str) -> Box<dyn Transport>;
}
