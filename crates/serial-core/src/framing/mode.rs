//! Framing modes and the extraction loop.
//!
//! A port is configured with a header, an optional footer, and an optional
//! fixed payload size ([`FrameDelimiters`]).  Which of those are set decides
//! how the byte stream is cut into packets:
//!
//! ```text
//! header  footer  mode
//! ──────  ──────  ─────────────────────────────────────────────────────────
//! empty   any     Raw          every chunk is passed through as one packet
//! set     empty   HeaderOnly   the header separates consecutive packets
//! set     set     HeaderFooter a packet runs from a header to the next footer
//! ```
//!
//! The decision is made once, when the delimiters are turned into a
//! [`FramingMode`], instead of on every received chunk.

use std::fmt;

use tracing::{debug, warn};

use super::buffer::{BufferError, FrameBuffer};

/// Delimiter configuration as entered by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameDelimiters {
    /// Frame start (or separator).  Empty disables framing.
    pub header: Vec<u8>,
    /// Frame end.  Empty selects header-only framing.
    pub footer: Vec<u8>,
    /// Payload bytes following the header in header-only mode.
    /// `0` means variable length, terminated by the next header.
    pub expected_size: usize,
}

impl FrameDelimiters {
    /// Raw passthrough: no delimiters at all.
    pub fn raw() -> Self {
        Self::default()
    }

    /// Header-separated packets.
    pub fn header_only(header: impl Into<Vec<u8>>, expected_size: usize) -> Self {
        Self {
            header: header.into(),
            footer: Vec::new(),
            expected_size,
        }
    }

    /// Header/footer-enclosed packets.
    pub fn header_footer(header: impl Into<Vec<u8>>, footer: impl Into<Vec<u8>>) -> Self {
        Self {
            header: header.into(),
            footer: footer.into(),
            expected_size: 0,
        }
    }

    /// Resolves the framing mode these delimiters select.
    pub fn mode(&self) -> FramingMode {
        FramingMode::from(self)
    }
}

/// How a byte stream is cut into packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingMode {
    /// No framing: whatever is buffered is one packet.
    Raw,
    /// Packets are separated by `header`.
    HeaderOnly { header: Vec<u8>, expected_size: usize },
    /// Packets start with `header` and end before `footer`.
    HeaderFooter { header: Vec<u8>, footer: Vec<u8> },
}

impl From<&FrameDelimiters> for FramingMode {
    fn from(delimiters: &FrameDelimiters) -> Self {
        match (delimiters.header.is_empty(), delimiters.footer.is_empty()) {
            (true, _) => FramingMode::Raw,
            (false, true) => FramingMode::HeaderOnly {
                header: delimiters.header.clone(),
                expected_size: delimiters.expected_size,
            },
            (false, false) => FramingMode::HeaderFooter {
                header: delimiters.header.clone(),
                footer: delimiters.footer.clone(),
            },
        }
    }
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingMode::Raw => write!(f, "raw"),
            FramingMode::HeaderOnly {
                header,
                expected_size,
            } => write!(
                f,
                "header-only(header={}, size={expected_size})",
                hex::encode(header)
            ),
            FramingMode::HeaderFooter { header, footer } => write!(
                f,
                "header-footer(header={}, footer={})",
                hex::encode(header),
                hex::encode(footer)
            ),
        }
    }
}

/// Result of one run of the extraction loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractOutcome {
    /// Non-empty packets, in stream order.
    pub packets: Vec<Vec<u8>>,
    /// Number of empty extractions that were dropped (e.g. a header at the
    /// very start of the buffer).
    pub empty_skipped: usize,
    /// Why the loop stopped early, if a pop failed.  `None` means the guard
    /// condition simply became false.
    pub stalled: Option<BufferError>,
}

impl FramingMode {
    /// Pops every complete packet currently held in `buffer`.
    ///
    /// Runs to a fixed point: on return, the buffer holds no further frame
    /// this mode could extract without more input.  Every iteration removes
    /// at least one byte, so the loop is bounded by the buffer length.
    pub fn extract(&self, buffer: &mut FrameBuffer) -> ExtractOutcome {
        let mut outcome = ExtractOutcome::default();

        match self {
            FramingMode::Raw => {
                if !buffer.is_empty() {
                    outcome.packets.push(buffer.pop_all());
                }
            }

            FramingMode::HeaderOnly {
                header,
                expected_size,
            } => {
                // Two headers guarantee one complete frame between them.
                while buffer.count(header) > 1 {
                    match buffer.pop_from(header, *expected_size) {
                        Ok(packet) => outcome.accept(packet),
                        Err(err) => {
                            if err == BufferError::DelimiterNotFound {
                                warn!("header vanished after count reported two: {err}");
                            } else {
                                debug!("waiting for more bytes: {err}");
                            }
                            outcome.stalled = Some(err);
                            break;
                        }
                    }
                }
            }

            FramingMode::HeaderFooter { header, footer } => {
                while buffer.contains(header) && buffer.contains(footer) {
                    match buffer.pop_from_to(header, footer) {
                        Ok(packet) => outcome.accept(packet),
                        Err(err) => {
                            // Footer only in front of the header: the frame is still open.
                            debug!("waiting for footer: {err}");
                            outcome.stalled = Some(err);
                            break;
                        }
                    }
                }
            }
        }

        outcome
    }
}

impl ExtractOutcome {
    fn accept(&mut self, packet: Vec<u8>) {
        if packet.is_empty() {
            self.empty_skipped += 1;
        } else {
            self.packets.push(packet);
        }
    }
}
