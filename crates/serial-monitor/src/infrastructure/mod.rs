//! Infrastructure layer: OS-facing adapters and runtime wiring.
//!
//! Contains the serial transport, port enumeration, TOML configuration,
//! logging setup, and the reader threads and scanner task that drive the
//! application layer.

pub mod enumeration;
pub mod logging;
pub mod runtime;
pub mod storage;
pub mod transport;
