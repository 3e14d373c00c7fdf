//! Port enumeration infrastructure.
//!
//! A [`PortEnumerator`] answers "which serial ports exist right now?".  The
//! registry calls it on every scan tick and diffs the answer against the
//! ports it has sessions for.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mock;
pub mod system;

/// Baud rates offered for every port, matching the usual standard set.
pub const STANDARD_BAUD_RATES: &[u32] = &[
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 250000, 460800, 921600,
];

/// What is known about one enumerated port.
///
/// Serialisable so UI consumers can render the port list directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Another process (or this one) holds the port open.
    pub busy: bool,
    pub baud_rates: Vec<u32>,
    /// Measured inbound throughput, updated on each accounting tick.
    pub bytes_per_second: f64,
}

impl PortInfo {
    /// A port with only a name; all other metadata empty.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            manufacturer: String::new(),
            serial_number: String::new(),
            vendor_id: None,
            product_id: None,
            busy: false,
            baud_rates: STANDARD_BAUD_RATES.to_vec(),
            bytes_per_second: 0.0,
        }
    }
}

/// Snapshot of all enumerated ports, keyed by name.
pub type PortSnapshot = HashMap<String, PortInfo>;

/// Failure of the enumeration collaborator.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("failed to enumerate ports: {0}")]
    Backend(String),
}

/// Source of port snapshots.
pub trait PortEnumerator: Send {
    fn enumerate(&self) -> Result<Vec<PortInfo>, EnumerationError>;
}
