//! PortSession: one open port, its framing configuration and its buffer.
//!
//! A session owns exactly one [`FrameBuffer`] and one [`Transport`].  Every
//! chunk read from the transport goes through [`PortSession::on_bytes_received`],
//! which pushes it into the buffer and runs the extraction loop of the
//! current [`FramingMode`] until no complete frame is left.  Each extracted
//! packet is delivered to subscribers as a [`SessionEvent::Packet`].
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──connect()──► Open ──close() / transport fault──► Closed
//!                      ▲                                     │
//!                      └────────────── connect() ────────────┘
//! ```
//!
//! - `Idle`: constructed, never connected.
//! - `Open`: transport connected, bytes flowing.
//! - `Closed`: transport released and buffer discarded.  A transport fault
//!   lands here too, after an error event has been emitted.
//!
//! # Concurrency
//!
//! The session is plain `&mut self` code with no internal threading.  Callers
//! share it as a [`SharedSession`] so that exactly one thread at a time feeds
//! it bytes; sessions for different ports share nothing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serial_core::{FrameBuffer, FrameDelimiters, FramingMode, DEFAULT_CAPACITY};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::infrastructure::transport::{LinkSettings, Transport, TransportError};

/// Default line speed.
pub const DEFAULT_BAUD_RATE: u32 = 250_000;
/// Default upper bound for a single blocking read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// A session shared between the registry, its reader thread and callers.
pub type SharedSession = Arc<Mutex<PortSession>>;

/// Locks a shared session, recovering the guard if a holder panicked.
///
/// A panic mid-extraction can at worst leave stale bytes in the buffer,
/// which the next extraction pass resynchronises past.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, PortSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub delimiters: FrameDelimiters,
    /// Maximum bytes the frame buffer retains.
    pub capacity: usize,
}

impl PortSettings {
    /// Raw (unframed) settings at the given baud rate.
    pub fn raw(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    pub fn with_delimiters(mut self, delimiters: FrameDelimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn link(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.baud_rate,
            read_timeout: self.read_timeout,
        }
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            delimiters: FrameDelimiters::raw(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Open,
    Closed,
}

/// Category of an error reported on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Opening or reopening the transport failed.
    Connect,
    /// A write failed.  The session stays open.
    Transmit,
    /// The transport failed while reading.  The session is closed.
    TransportFault,
}

/// Events delivered to session subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One extracted packet.
    Packet(Vec<u8>),
    /// Something went wrong; `message` is ready to show to the user.
    Error { kind: ErrorKind, message: String },
    /// The session released its transport.
    Closed,
}

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),
    #[error("transmit failed: {0}")]
    Transmit(#[source] TransportError),
    #[error("transport fault: {0}")]
    TransportFault(#[source] TransportError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Connect(_) => ErrorKind::Connect,
            SessionError::Transmit(_) => ErrorKind::Transmit,
            SessionError::TransportFault(_) => ErrorKind::TransportFault,
        }
    }
}

/// One port connection with its framing state.
pub struct PortSession {
    name: String,
    settings: PortSettings,
    mode: FramingMode,
    buffer: FrameBuffer,
    transport: Box<dyn Transport>,
    state: SessionState,
    emitting: bool,
    bytes_read_since_tick: u64,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    last_error: Option<String>,
    close_notifier: Option<mpsc::UnboundedSender<String>>,
}

impl PortSession {
    /// Creates an idle session.  Nothing is opened until [`connect`](Self::connect).
    pub fn new(name: impl Into<String>, settings: PortSettings, transport: Box<dyn Transport>) -> Self {
        let mode = settings.delimiters.mode();
        let buffer = FrameBuffer::new(settings.capacity);
        Self {
            name: name.into(),
            settings,
            mode,
            buffer,
            transport,
            state: SessionState::Idle,
            emitting: true,
            bytes_read_since_tick: 0,
            subscribers: Vec::new(),
            last_error: None,
            close_notifier: None,
        }
    }

    /// Wraps the session for sharing across threads.
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    pub fn mode(&self) -> &FramingMode {
        &self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn is_emitting(&self) -> bool {
        self.emitting
    }

    /// Bytes currently waiting in the frame buffer.
    pub fn buffered(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Message of the most recent error this session reported.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn bytes_read_since_tick(&self) -> u64 {
        self.bytes_read_since_tick
    }

    /// Returns the byte counter and resets it to zero.
    pub fn take_bytes_read(&mut self) -> u64 {
        std::mem::take(&mut self.bytes_read_since_tick)
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Registers a new subscriber for packets, errors and close notices.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Channel on which the session announces its own closure by name.
    pub fn set_close_notifier(&mut self, notifier: mpsc::UnboundedSender<String>) {
        self.close_notifier = Some(notifier);
    }

    fn emit(&mut self, event: SessionEvent) {
        // Subscribers that dropped their receiver are forgotten.
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn report(&mut self, kind: ErrorKind, message: String) {
        self.last_error = Some(message.clone());
        self.emit(SessionEvent::Error { kind, message });
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Replaces the settings.  Takes effect for the next extraction; bytes
    /// already buffered are kept (trimmed if the capacity shrank).
    ///
    /// Line settings (baud rate, timeout) apply on the next `connect`.
    pub fn configure(&mut self, settings: PortSettings) {
        self.mode = settings.delimiters.mode();
        self.buffer.set_capacity(settings.capacity);
        info!(
            "{}: framing {} (capacity {})",
            self.name,
            self.mode,
            self.buffer.capacity()
        );
        self.settings = settings;
    }

    /// Opens the transport, releasing it first if it is already open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] and emits an error event if the
    /// transport cannot be opened.  A session that was open before is left
    /// `Closed` in that case.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        if self.transport.is_connected() {
            debug!("{}: releasing handle before reconnect", self.name);
            self.transport.disconnect();
        }

        if let Err(err) = self.transport.connect(&self.settings.link()) {
            warn!("{}: {err}", self.name);
            self.report(ErrorKind::Connect, err.to_string());
            if self.state == SessionState::Open {
                self.shutdown();
            }
            return Err(SessionError::Connect(err));
        }

        self.buffer.clear();
        self.state = SessionState::Open;
        info!(
            "{}: open at {} baud, framing {}",
            self.name, self.settings.baud_rate, self.mode
        );
        Ok(())
    }

    /// Feeds newly arrived bytes through the framer.
    ///
    /// Returns the number of packets extracted.  While paused, packets are
    /// still extracted (so the buffer keeps draining) but are discarded
    /// instead of delivered.
    pub fn on_bytes_received(&mut self, chunk: &[u8]) -> usize {
        self.bytes_read_since_tick += chunk.len() as u64;
        self.buffer.push(chunk);

        let outcome = self.mode.extract(&mut self.buffer);
        let extracted = outcome.packets.len();

        if !self.emitting {
            if extracted > 0 {
                debug!("{}: paused, discarded {extracted} packet(s)", self.name);
            }
            return extracted;
        }

        for packet in outcome.packets {
            debug!("{}: packet {}", self.name, hex::encode(&packet));
            self.emit(SessionEvent::Packet(packet));
        }
        extracted
    }

    /// Reads one chunk from the transport and frames it.
    ///
    /// Returns the number of bytes read (`0` if nothing arrived within the
    /// read timeout, or if the session is not open).
    ///
    /// # Errors
    ///
    /// A read failure is fatal: the session is closed, an error event is
    /// emitted, and [`SessionError::TransportFault`] is returned.
    pub fn poll(&mut self, scratch: &mut [u8]) -> Result<usize, SessionError> {
        if !self.is_open() {
            return Ok(0);
        }
        match self.transport.read_chunk(scratch) {
            Ok(0) => Ok(0),
            Ok(n) => {
                self.on_bytes_received(&scratch[..n]);
                Ok(n)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Handles a transport fault reported from outside the read path.
    pub fn fail(&mut self, err: TransportError) -> SessionError {
        error!("{}: {err}", self.name);
        self.report(ErrorKind::TransportFault, err.to_string());
        self.shutdown();
        SessionError::TransportFault(err)
    }

    /// Stops delivering packets.
    pub fn pause(&mut self) {
        self.emitting = false;
    }

    /// Resumes delivering packets.  Nothing discarded while paused is replayed.
    pub fn resume(&mut self) {
        self.emitting = true;
    }

    /// Transmits `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transmit`] if the session is not open or the
    /// write fails.  The session stays open either way.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::Transmit(TransportError::NotOpen {
                port: self.name.clone(),
            }));
        }
        if let Err(err) = self.transport.write_all(bytes) {
            warn!("{}: {err}", self.name);
            self.report(ErrorKind::Transmit, err.to_string());
            return Err(SessionError::Transmit(err));
        }
        debug!("{}: sent {} byte(s)", self.name, bytes.len());
        Ok(())
    }

    /// Releases the transport and discards buffered bytes.  Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.shutdown();
        }
    }

    fn shutdown(&mut self) {
        self.transport.disconnect();
        self.buffer.clear();
        self.state = SessionState::Closed;
        info!("{}: closed", self.name);
        self.emit(SessionEvent::Closed);
        if let Some(notifier) = &self.close_notifier {
            // The registry may already be gone during teardown.
            let _ = notifier.send(self.name.clone());
        }
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("emitting", &self.emitting)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::{ScriptedTransport, TransportHandle};
    use crate::infrastructure::transport::MockTransport;

    const HEADER: [u8; 2] = [0xFF, 0x00];

    fn scripted(settings: PortSettings) -> (PortSession, TransportHandle) {
        let handle = TransportHandle::new();
        let transport = ScriptedTransport::new("COM1", handle.clone());
        (PortSession::new("COM1", settings, Box::new(transport)), handle)
    }

    fn open_session(settings: PortSettings) -> (PortSession, TransportHandle) {
        let (mut session, handle) = scripted(settings);
        session.connect().expect("scripted connect should succeed");
        (session, handle)
    }

    fn packets(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Packet(p) = event {
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn test_new_session_is_idle_and_emitting() {
        let (session, _) = scripted(PortSettings::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.is_emitting());
        assert_eq!(session.mode(), &FramingMode::Raw);
    }

    #[test]
    fn test_connect_opens_with_link_settings() {
        let (session, handle) = open_session(PortSettings::raw(115_200));
        assert!(session.is_open());
        assert_eq!(handle.last_link().unwrap().baud_rate, 115_200);
    }

    #[test]
    fn test_raw_mode_emits_each_chunk_whole() {
        let (mut session, _) = open_session(PortSettings::default());
        let mut rx = session.subscribe();

        session.on_bytes_received(b"hello");
        session.on_bytes_received(b" world");

        assert_eq!(packets(&mut rx), vec![b"hello".to_vec(), b" world".to_vec()]);
        assert_eq!(session.buffered_len(), 0);
    }

    #[test]
    fn test_header_only_emits_every_complete_frame_in_one_call() {
        let settings =
            PortSettings::default().with_delimiters(FrameDelimiters::header_only(HEADER, 0));
        let (mut session, _) = open_session(settings);
        let mut rx = session.subscribe();

        let extracted = session.on_bytes_received(&[1, 0xFF, 0x00, 2, 0xFF, 0x00, 3, 0xFF, 0x00]);

        assert_eq!(extracted, 2);
        assert_eq!(packets(&mut rx), vec![vec![1], vec![2]]);
        assert_eq!(session.buffered(), &[3, 0xFF, 0x00]);
    }

    #[test]
    fn test_header_footer_frames_across_chunks() {
        let settings =
            PortSettings::default().with_delimiters(FrameDelimiters::header_footer(*b"<", *b">"));
        let (mut session, _) = open_session(settings);
        let mut rx = session.subscribe();

        session.on_bytes_received(b"<AB");
        assert!(packets(&mut rx).is_empty());
        session.on_bytes_received(b"C><D");

        assert_eq!(packets(&mut rx), vec![b"<ABC".to_vec()]);
        assert_eq!(session.buffered(), b"<D");
    }

    #[test]
    fn test_pause_discards_packets_without_changing_buffer_state() {
        // Arrange: two identical sessions, one paused.
        let settings =
            PortSettings::default().with_delimiters(FrameDelimiters::header_only(*b"|", 0));
        let (mut paused, _) = open_session(settings.clone());
        let (mut live, _) = open_session(settings);
        let mut paused_rx = paused.subscribe();
        let mut live_rx = live.subscribe();
        paused.pause();

        // Act
        for session in [&mut paused, &mut live] {
            session.on_bytes_received(b"a|b|c|");
        }

        // Assert
        assert!(packets(&mut paused_rx).is_empty());
        assert_eq!(packets(&mut live_rx).len(), 2);
        assert_eq!(paused.buffered(), live.buffered());
    }

    #[test]
    fn test_resume_does_not_replay_discarded_packets() {
        let settings =
            PortSettings::default().with_delimiters(FrameDelimiters::header_only(*b"|", 0));
        let (mut session, _) = open_session(settings);
        let mut rx = session.subscribe();

        session.pause();
        session.on_bytes_received(b"old|");
        session.on_bytes_received(b"|");
        session.resume();
        session.on_bytes_received(b"new|");

        assert_eq!(packets(&mut rx), vec![b"new".to_vec()]);
    }

    #[test]
    fn test_configure_switches_mode_for_future_extraction() {
        let (mut session, _) = open_session(PortSettings::default());
        let mut rx = session.subscribe();

        session.configure(
            PortSettings::default()
                .with_delimiters(FrameDelimiters::header_only(*b"\n", 0))
                .with_capacity(64),
        );
        session.on_bytes_received(b"line1\nline2\npartial");

        assert_eq!(packets(&mut rx), vec![b"line1".to_vec()]);
        assert_eq!(session.buffered(), b"line2\npartial");
    }

    #[test]
    fn test_byte_counter_accumulates_and_resets() {
        let (mut session, _) = open_session(PortSettings::default());
        session.on_bytes_received(&[0; 10]);
        session.on_bytes_received(&[0; 5]);

        assert_eq!(session.take_bytes_read(), 15);
        assert_eq!(session.bytes_read_since_tick(), 0);
    }

    #[test]
    fn test_poll_reads_and_frames_transport_bytes() {
        let (mut session, handle) = open_session(PortSettings::default());
        let mut rx = session.subscribe();
        handle.feed(b"abc".to_vec());

        let mut scratch = [0u8; 64];
        let n = session.poll(&mut scratch).unwrap();

        assert_eq!(n, 3);
        assert_eq!(packets(&mut rx), vec![b"abc".to_vec()]);
    }

    #[test]
    fn test_poll_fault_closes_session_and_reports() {
        let (mut session, handle) = open_session(PortSettings::default());
        let mut rx = session.subscribe();
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        session.set_close_notifier(notify_tx);
        handle.unplug("COM1");

        let mut scratch = [0u8; 64];
        let result = session.poll(&mut scratch);

        assert!(matches!(result, Err(SessionError::TransportFault(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.last_error(), Some("device COM1 not found"));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Error {
                kind: ErrorKind::TransportFault,
                message: "device COM1 not found".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Closed);
        assert_eq!(notify_rx.try_recv().unwrap(), "COM1");
    }

    #[test]
    fn test_close_releases_transport_and_clears_buffer() {
        let settings =
            PortSettings::default().with_delimiters(FrameDelimiters::header_only(*b"|", 0));
        let (mut session, handle) = open_session(settings);
        session.on_bytes_received(b"pending");

        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.buffered_len(), 0);
        assert!(!handle.is_connected());
        assert_eq!(handle.disconnect_count(), 1);
    }

    #[test]
    fn test_send_on_closed_session_is_transmit_error() {
        let (mut session, _) = scripted(PortSettings::default());
        let result = session.send(b"x");
        assert!(matches!(
            result,
            Err(SessionError::Transmit(TransportError::NotOpen { .. }))
        ));
    }

    #[test]
    fn test_reconnect_releases_handle_first() {
        let (mut session, handle) = open_session(PortSettings::raw(9600));

        session.configure(PortSettings::raw(19_200));
        session.connect().expect("reconnect should succeed");

        assert_eq!(handle.disconnect_count(), 1);
        assert_eq!(handle.connect_count(), 2);
        assert_eq!(handle.last_link().unwrap().baud_rate, 19_200);
        assert!(session.is_open());
    }

    // ── Expectation-style tests against the mockall transport ────────────────

    #[test]
    fn test_connect_failure_emits_error_and_stays_idle() {
        // Arrange
        let mut transport = MockTransport::new();
        transport.expect_is_connected().return_const(false);
        transport.expect_connect().times(1).returning(|_| {
            Err(TransportError::PermissionDenied {
                port: "/dev/ttyS0".to_string(),
            })
        });
        let mut session =
            PortSession::new("/dev/ttyS0", PortSettings::default(), Box::new(transport));
        let mut rx = session.subscribe();

        // Act
        let result = session.connect();

        // Assert
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Connect);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.last_error(), Some("permission error on /dev/ttyS0"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::Error {
                kind: ErrorKind::Connect,
                ..
            }
        ));
    }

    #[test]
    fn test_send_failure_is_reported_but_not_fatal() {
        // Arrange
        let mut transport = MockTransport::new();
        transport.expect_is_connected().return_const(false);
        transport.expect_connect().returning(|_| Ok(()));
        transport.expect_write_all().times(1).returning(|_| {
            Err(TransportError::Timeout {
                port: "COM4".to_string(),
            })
        });
        let mut session = PortSession::new("COM4", PortSettings::default(), Box::new(transport));
        session.connect().unwrap();

        // Act
        let result = session.send(b"AT\r\n");

        // Assert
        assert!(matches!(result, Err(SessionError::Transmit(_))));
        assert!(session.is_open(), "a failed write must not close the session");
        assert_eq!(session.last_error(), Some("timeout on COM4"));
    }

    #[test]
    fn test_send_passes_bytes_to_transport() {
        let mut transport = MockTransport::new();
        transport.expect_is_connected().return_const(false);
        transport.expect_connect().returning(|_| Ok(()));
        transport
            .expect_write_all()
            .withf(|bytes: &[u8]| bytes == b"ping")
            .times(1)
            .returning(|_| Ok(()));
        let mut session = PortSession::new("COM5", PortSettings::default(), Box::new(transport));
        session.connect().unwrap();

        assert!(session.send(b"ping").is_ok());
    }

    #[test]
    fn test_failed_reconnect_closes_previously_open_session() {
        let mut transport = MockTransport::new();
        let mut connects = 0;
        transport.expect_connect().times(2).returning(move |_| {
            connects += 1;
            if connects == 1 {
                Ok(())
            } else {
                Err(TransportError::DeviceNotFound {
                    port: "COM6".to_string(),
                })
            }
        });
        transport.expect_is_connected().return_const(true);
        transport.expect_disconnect().return_const(());
        let mut session = PortSession::new("COM6", PortSettings::default(), Box::new(transport));
        session.connect().unwrap();

        let result = session.connect();

        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }
}
