//! Application layer: port sessions and the registry that coordinates them.
//!
//! # Sub-modules
//!
//! - **`port_session`**  – One open port.  Feeds arriving bytes through its
//!   frame buffer, emits packets, handles pause/resume, send and close.
//!   This runs on every chunk read from the wire.
//!
//! - **`port_registry`** – Every open session by name, plus the latest port
//!   snapshot.  Diffs enumeration results against open sessions and turns
//!   byte counters into throughput figures.
//!
//! Both depend only on the transport and enumeration *traits*, so they run
//! unchanged against real hardware or the scripted test doubles.

pub mod port_registry;
pub mod port_session;
