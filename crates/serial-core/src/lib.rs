//! # serial-core
//!
//! Packet framing for continuous serial byte streams.
//!
//! A serial line delivers bytes in arbitrary chunks at arbitrary times.  The
//! device on the other end usually sends discrete packets, marked by a fixed
//! header (and sometimes a footer).  This crate turns the chunk stream back
//! into packets.
//!
//! It has zero dependencies on OS APIs, serial drivers, or async runtimes, so
//! everything here can be unit-tested without hardware.
//!
//! # Architecture overview
//!
//! - **`framing::buffer`** – [`FrameBuffer`], a bounded append-only byte
//!   accumulator.  When a push would exceed its capacity the oldest bytes are
//!   discarded, so a stuck producer can never grow memory without bound.
//!
//! - **`framing::mode`** – [`FrameDelimiters`] (what the user configured) and
//!   [`FramingMode`] (what that configuration means: raw passthrough,
//!   header-separated, or header/footer-enclosed).  `FramingMode::extract`
//!   is the extraction loop: it pops every complete packet currently held in
//!   a buffer.

pub mod framing;

pub use framing::buffer::{BufferError, FrameBuffer, DEFAULT_CAPACITY};
pub use framing::mode::{ExtractOutcome, FrameDelimiters, FramingMode};
