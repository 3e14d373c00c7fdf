//! Structured logging setup.
//!
//! The monitor logs through `tracing`.  Packets are logged at `debug` as hex,
//! open/close at `info`, recoverable faults at `warn` and transport faults
//! at `error`.  `RUST_LOG` overrides the configured level.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was installed before this call.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Installs the global `fmt` subscriber at `level` (e.g. `"info"`), unless
/// `RUST_LOG` is set.
///
/// # Errors
///
/// Returns [`LoggingError::AlreadyInstalled`] if called twice in one process.
pub fn init_tracing(level: &str) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}
