//! serial-monitor library entry point.
//!
//! Sessions and the registry live in [`application`]; serial ports, port
//! enumeration, configuration and the reader/scanner runtime live in
//! [`infrastructure`].  The byte-level framing itself comes from
//! `serial_core`.
//!
//! Integration tests in `tests/` drive the same module tree with the
//! scripted transport and mock enumerator.

pub mod application;
pub mod infrastructure;

pub use application::port_registry::PortRegistry;
pub use application::port_session::{
    ErrorKind, PortSession, PortSettings, SessionError, SessionEvent, SessionState, SharedSession,
};
pub use infrastructure::runtime::MonitorService;
pub use infrastructure::storage::config::{ConfigError, MonitorConfig};
