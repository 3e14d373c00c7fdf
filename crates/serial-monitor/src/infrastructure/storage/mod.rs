//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module reads the monitor's TOML configuration and turns
//! per-port profiles into [`PortSettings`](crate::application::port_session::PortSettings).
//! Nothing is written back; the file is edited by hand.

pub mod config;
