//! Scripted transport for tests.
//!
//! A [`ScriptedTransport`] replays whatever a test queued on its
//! [`TransportHandle`]: incoming chunks, read faults, connect and write
//! failures.  Writes are recorded so tests can assert on transmitted bytes.
//!
//! All transports created by one [`ScriptedTransportFactory`] for the same
//! port name share a handle, so a test can script a port before the
//! registry has even opened it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{LinkSettings, Transport, TransportError, TransportFactory};

#[derive(Default)]
struct ScriptState {
    connected: bool,
    connect_count: u32,
    disconnect_count: u32,
    last_link: Option<LinkSettings>,
    incoming: VecDeque<Result<Vec<u8>, TransportError>>,
    connect_failures: VecDeque<TransportError>,
    write_failures: VecDeque<TransportError>,
    written: Vec<Vec<u8>>,
}

/// Test-side control of a scripted port.
#[derive(Clone, Default)]
pub struct TransportHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl TransportHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a chunk to be returned by a future read.
    pub fn feed(&self, bytes: impl Into<Vec<u8>>) {
        self.state().incoming.push_back(Ok(bytes.into()));
    }

    /// Queues a read fault behind any chunks already fed.
    pub fn fail_read(&self, error: TransportError) {
        self.state().incoming.push_back(Err(error));
    }

    /// Makes the next `connect` fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.state().connect_failures.push_back(error);
    }

    /// Makes the next `write_all` fail with `error`.
    pub fn fail_next_write(&self, error: TransportError) {
        self.state().write_failures.push_back(error);
    }

    /// Simulates the device disappearing: the connection drops and the next
    /// read reports the device as gone.
    pub fn unplug(&self, port: &str) {
        let mut state = self.state();
        state.incoming.clear();
        state.incoming.push_back(Err(TransportError::DeviceNotFound {
            port: port.to_string(),
        }));
    }

    /// Every successful write, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn connect_count(&self) -> u32 {
        self.state().connect_count
    }

    pub fn disconnect_count(&self) -> u32 {
        self.state().disconnect_count
    }

    pub fn last_link(&self) -> Option<LinkSettings> {
        self.state().last_link.clone()
    }

    /// Number of queued reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.state().incoming.len()
    }
}

/// A [`Transport`] driven entirely by its [`TransportHandle`].
pub struct ScriptedTransport {
    port: String,
    handle: TransportHandle,
}

impl ScriptedTransport {
    pub fn new(port: impl Into<String>, handle: TransportHandle) -> Self {
        Self {
            port: port.into(),
            handle,
        }
    }

    fn not_open(&self) -> TransportError {
        TransportError::NotOpen {
            port: self.port.clone(),
        }
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, link: &LinkSettings) -> Result<(), TransportError> {
        let mut state = self.handle.state();
        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }
        if state.connected {
            return Err(TransportError::OpenFailed {
                port: self.port.clone(),
                reason: "already open".to_string(),
            });
        }
        state.connected = true;
        state.connect_count += 1;
        state.last_link = Some(link.clone());
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.handle.state();
        if !state.connected {
            return Err(self.not_open());
        }
        match state.incoming.pop_front() {
            None => Ok(0),
            Some(Err(error)) => {
                state.connected = false;
                Err(error)
            }
            Some(Ok(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.incoming.push_front(Ok(chunk.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.handle.state();
        if !state.connected {
            return Err(self.not_open());
        }
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        state.written.push(bytes.to_vec());
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.handle.state();
        if state.connected {
            state.connected = false;
            state.disconnect_count += 1;
        }
    }

    fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }
}

/// Factory handing out [`ScriptedTransport`]s that share per-port handles.
#[derive(Clone, Default)]
pub struct ScriptedTransportFactory {
    handles: Arc<Mutex<HashMap<String, TransportHandle>>>,
}

impl ScriptedTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `port`, creating it if needed.
    pub fn handle(&self, port: &str) -> TransportHandle {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(port.to_string())
            .or_default()
            .clone()
    }
}

impl TransportFactory for ScriptedTransportFactory {
    fn create(&self, port: &str) -> Box<dyn Transport> {
        Box::new(ScriptedTransport::new(port, self.handle(port)))
    }
}
