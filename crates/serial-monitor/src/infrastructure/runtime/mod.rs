//! Runtime: the threads and tasks that drive sessions and the registry.
//!
//! # Architecture
//!
//! ```text
//! MonitorService
//!  ├─ reader thread per open port   (blocking serial reads, std::thread)
//!  └─ scanner task                  (tokio interval: scan + throughput)
//! ```
//!
//! Blocking serial I/O never runs on the Tokio runtime: readers are plain
//! threads and the scanner hands registry work to `spawn_blocking`.

pub mod reader;
pub mod scanner;
pub mod service;

pub use service::{MonitorService, SharedRegistry};
