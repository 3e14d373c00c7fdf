//! Bounded byte accumulator with delimiter-based extraction.
//!
//! [`FrameBuffer`] collects bytes in arrival order and hands them back out in
//! packet-sized pieces.  The buffer never holds more than its capacity: when a
//! push would overflow, the oldest bytes are dropped so that only the newest
//! `capacity` bytes remain.
//!
//! # Why drop the oldest bytes?
//!
//! A producer that never sends a recognisable delimiter (wrong baud rate,
//! wrong header configured, line noise) would otherwise grow the buffer
//! forever.  Keeping the freshest bytes means the framer resynchronises as
//! soon as a valid header shows up again, and what is lost is data that was
//! too old to have been framed anyway.
//!
//! # Failure leaves the buffer untouched
//!
//! Every `pop_*` operation either succeeds and removes bytes, or fails and
//! leaves the content byte-for-byte unchanged.  Callers treat both failure
//! kinds as "wait for more input" and simply retry after the next push.

use thiserror::Error;

/// Capacity used when a configuration does not specify one.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Errors returned by the extraction operations of [`FrameBuffer`].
///
/// Both variants are recoverable: they mean the buffer does not (yet) hold
/// what the caller asked for.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Fewer bytes are buffered than the operation needs.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The requested delimiter does not occur (in the required position).
    #[error("delimiter not found in buffer")]
    DelimiterNotFound,
}

/// A bounded, append-only byte accumulator.
///
/// # Examples
///
/// ```rust
/// use serial_core::FrameBuffer;
///
/// let mut buffer = FrameBuffer::new(4);
/// buffer.push(b"abcdef");
/// assert_eq!(buffer.as_slice(), b"cdef");
/// ```
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    capacity: usize,
    bytes: Vec<u8>,
}

impl FrameBuffer {
    /// Creates an empty buffer that retains at most `capacity` bytes.
    ///
    /// A capacity of zero is raised to one; the buffer must always be able
    /// to hold at least the newest byte.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Maximum number of bytes retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity.  Shrinking keeps the newest bytes.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.truncate_front();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Current content, oldest byte first.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Appends `chunk`, discarding the oldest bytes if the result would
    /// exceed the capacity.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.capacity {
            // Only the tail of the chunk can survive.
            self.bytes.clear();
            self.bytes
                .extend_from_slice(&chunk[chunk.len() - self.capacity..]);
            return;
        }
        self.bytes.extend_from_slice(chunk);
        self.truncate_front();
    }

    /// Removes and returns the entire content.
    pub fn pop_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    /// Removes and returns exactly `n` bytes from the front.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::InsufficientData`] if fewer than `n` bytes are
    /// buffered.
    pub fn pop_bytes(&mut self, n: usize) -> Result<Vec<u8>, BufferError> {
        if self.bytes.len() < n {
            return Err(BufferError::InsufficientData {
                needed: n,
                available: self.bytes.len(),
            });
        }
        Ok(self.bytes.drain(..n).collect())
    }

    /// Pops the bytes that precede the first occurrence of `header`.
    ///
    /// With `size == 0` the header itself is consumed as well.  With
    /// `size > 0` the header plus `size` trailing bytes after it are consumed
    /// too, and the call fails until that many bytes have arrived.
    ///
    /// The returned bytes never include the header.
    ///
    /// # Errors
    ///
    /// - [`BufferError::DelimiterNotFound`] if `header` is empty or absent.
    /// - [`BufferError::InsufficientData`] if `size > 0` and the bytes after
    ///   the header are not all here yet.
    pub fn pop_from(&mut self, header: &[u8], size: usize) -> Result<Vec<u8>, BufferError> {
        let index = self.find(header, 0).ok_or(BufferError::DelimiterNotFound)?;
        let consumed = index + header.len() + size;
        if self.bytes.len() < consumed {
            return Err(BufferError::InsufficientData {
                needed: consumed,
                available: self.bytes.len(),
            });
        }

        let output = self.bytes[..index].to_vec();
        self.bytes.drain(..consumed);
        Ok(output)
    }

    /// Pops a header-to-footer frame.
    ///
    /// The footer is searched for only after the end of the first header
    /// occurrence.  The returned bytes start at the header (included) and
    /// stop just before the footer (excluded).  Everything up to and
    /// including the footer is removed, so any garbage in front of the
    /// header is discarded along with the frame.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::DelimiterNotFound`] if either delimiter is
    /// empty, the header is absent, or no footer follows it.
    pub fn pop_from_to(&mut self, header: &[u8], footer: &[u8]) -> Result<Vec<u8>, BufferError> {
        let start = self.find(header, 0).ok_or(BufferError::DelimiterNotFound)?;
        let end = self
            .find(footer, start + header.len())
            .ok_or(BufferError::DelimiterNotFound)?;

        let output = self.bytes[start..end].to_vec();
        self.bytes.drain(..end + footer.len());
        Ok(output)
    }

    /// Number of non-overlapping occurrences of `pattern`.
    ///
    /// An empty pattern never matches.
    pub fn count(&self, pattern: &[u8]) -> usize {
        let mut occurrences = 0;
        let mut from = 0;
        while let Some(index) = self.find(pattern, from) {
            occurrences += 1;
            from = index + pattern.len();
        }
        occurrences
    }

    /// Whether `pattern` occurs anywhere in the buffer.
    ///
    /// An empty pattern never matches.
    pub fn contains(&self, pattern: &[u8]) -> bool {
        self.find(pattern, 0).is_some()
    }

    /// Index of the first occurrence of `pattern` at or after `from`.
    fn find(&self, pattern: &[u8], from: usize) -> Option<usize> {
        if pattern.is_empty() || from >= self.bytes.len() {
            return None;
        }
        self.bytes[from..]
            .windows(pattern.len())
            .position(|window| window == pattern)
            .map(|offset| offset + from)
    }

    fn truncate_front(&mut self) {
        if self.bytes.len() > self.capacity {
            let excess = self.bytes.len() - self.capacity;
            self.bytes.drain(..excess);
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
