//! MonitorService: the async façade over the registry and its threads.
//!
//! The service owns the shared [`PortRegistry`], starts one reader thread
//! per opened port and, on request, the periodic scanner.  It is the type a
//! UI layer holds on to.
//!
//! # Locking
//!
//! The registry sits behind a Tokio mutex so async callers can queue for it
//! without blocking the runtime.  Every registry call that touches a session
//! runs under `spawn_blocking` with an owned guard: sessions have their own
//! std mutex, which a reader thread holds for a whole blocking read.  The
//! lock order is always registry, then session.
//!
//! # Reader threads
//!
//! A reader belongs to one session object, not to a port name.  After a
//! close and reopen the old reader may still be finishing its last read on
//! the closed session, so a reopened port always gets a reader of its own.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use super::reader::spawn_reader;
use super::scanner::{spawn_scanner, ScannerHandle};
use crate::application::port_registry::PortRegistry;
use crate::application::port_session::{PortSettings, SharedSession};
use crate::infrastructure::enumeration::system::SystemPortEnumerator;
use crate::infrastructure::enumeration::{EnumerationError, PortEnumerator, PortInfo, PortSnapshot};
use crate::infrastructure::logging::{init_tracing, LoggingError};
use crate::infrastructure::storage::config::MonitorConfig;
use crate::infrastructure::transport::serial::SerialTransportFactory;
use crate::infrastructure::transport::TransportFactory;

/// The registry as shared between the service and the scanner task.
pub type SharedRegistry = Arc<tokio::sync::Mutex<PortRegistry>>;

/// A reader thread and the session it drives.
struct ReaderSlot {
    port: String,
    session: SharedSession,
    handle: JoinHandle<()>,
}

/// Top-level handle for a running monitor.
pub struct MonitorService {
    config: MonitorConfig,
    registry: SharedRegistry,
    running: Arc<AtomicBool>,
    readers: Mutex<Vec<ReaderSlot>>,
    scanner: tokio::sync::Mutex<Option<ScannerHandle>>,
}

impl MonitorService {
    pub fn new(
        config: MonitorConfig,
        enumerator: Box<dyn PortEnumerator>,
        factory: Box<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(tokio::sync::Mutex::new(PortRegistry::new(enumerator, factory))),
            running: Arc::new(AtomicBool::new(true)),
            readers: Mutex::new(Vec::new()),
            scanner: tokio::sync::Mutex::new(None),
        }
    }

    /// A service backed by the OS port list and real serial ports.
    ///
    /// Installs the global tracing subscriber at `monitor.log_level` unless
    /// the embedding application already installed one.
    pub fn system(config: MonitorConfig) -> Self {
        match init_tracing(&config.monitor.log_level) {
            Ok(()) => info!("logging at {}", config.monitor.log_level),
            Err(LoggingError::AlreadyInstalled(_)) => {
                debug!("keeping the existing tracing subscriber");
            }
        }
        let factory = SerialTransportFactory::new(config.close_wait());
        Self::new(config, Box::new(SystemPortEnumerator::new()), Box::new(factory))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Runs `f` against the registry on the blocking pool.
    async fn with_registry<T, F>(&self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce(&mut PortRegistry) -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(&self.registry).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let mut registry = guard;
            f(&mut registry)
        })
        .await
    }

    // ── Ports ─────────────────────────────────────────────────────────────────

    /// Opens `name` with the settings the config resolves for it.
    pub async fn open_port(&self, name: &str) -> Option<SharedSession> {
        self.open_port_with(name, self.config.settings_for(name)).await
    }

    /// Opens (or reopens) `name` and makes sure a reader is running for it.
    ///
    /// Returns `None` if the port could not be opened (see
    /// [`last_error`](Self::last_error)) or the service has been shut down.
    pub async fn open_port_with(&self, name: &str, settings: PortSettings) -> Option<SharedSession> {
        if !self.running.load(Ordering::Relaxed) {
            warn!("{name}: not opening, monitor is shut down");
            return None;
        }
        let port = name.to_string();
        let opened = self
            .with_registry(move |registry| registry.open(&port, settings))
            .await;

        let session = match opened {
            Ok(session) => session?,
            Err(e) => {
                error!("{name}: open task failed: {e}");
                return None;
            }
        };
        self.ensure_reader(name, &session);
        Some(session)
    }

    fn ensure_reader(&self, name: &str, session: &SharedSession) {
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);

        let (finished, live): (Vec<ReaderSlot>, Vec<ReaderSlot>) =
            readers.drain(..).partition(|r| r.handle.is_finished());
        *readers = live;
        for slot in finished {
            if slot.handle.join().is_err() {
                error!("{}: reader thread panicked", slot.port);
            }
        }

        if readers.iter().any(|r| Arc::ptr_eq(&r.session, session)) {
            return;
        }
        match spawn_reader(Arc::clone(session), Arc::clone(&self.running)) {
            Ok(handle) => readers.push(ReaderSlot {
                port: name.to_string(),
                session: Arc::clone(session),
                handle,
            }),
            Err(e) => error!("{name}: failed to spawn reader thread: {e}"),
        }
    }

    /// Closes `name`.  Returns whether it was open.
    pub async fn close_port(&self, name: &str) -> bool {
        let port = name.to_string();
        match self.with_registry(move |registry| registry.close(&port)).await {
            Ok(closed) => closed,
            Err(e) => {
                error!("{name}: close task failed: {e}");
                false
            }
        }
    }

    /// Rescans immediately instead of waiting for the next tick.
    pub async fn scan_now(&self) -> Result<PortSnapshot, EnumerationError> {
        self.with_registry(|registry| registry.scan())
            .await
            .map_err(|e| EnumerationError::Backend(format!("scan task failed: {e}")))?
    }

    /// Snapshot only; no session is locked.
    pub async fn port_list(&self) -> Vec<PortInfo> {
        self.registry.lock().await.port_list()
    }

    pub async fn active_ports(&self) -> Vec<String> {
        self.with_registry(|registry| registry.active_ports())
            .await
            .unwrap_or_else(|e| {
                error!("active ports query failed: {e}");
                Vec::new()
            })
    }

    pub async fn session(&self, name: &str) -> Option<SharedSession> {
        let port = name.to_string();
        self.with_registry(move |registry| registry.session(&port))
            .await
            .unwrap_or_else(|e| {
                error!("{name}: session query failed: {e}");
                None
            })
    }

    pub async fn last_error(&self, name: &str) -> Option<String> {
        let port = name.to_string();
        self.with_registry(move |registry| registry.last_error(&port))
            .await
            .unwrap_or_else(|e| {
                error!("{name}: last error query failed: {e}");
                None
            })
    }

    // ── Background work ───────────────────────────────────────────────────────

    /// Starts the periodic scanner if it is not already running and returns
    /// the channel its snapshots are published on.
    ///
    /// Returns `None` if a scanner is already running.
    pub async fn start_scanner(&self) -> Option<mpsc::Receiver<PortSnapshot>> {
        let mut scanner = self.scanner.lock().await;
        if scanner.as_ref().is_some_and(|s| !s.is_finished()) {
            warn!("port scanner already running");
            return None;
        }
        let (handle, rx) = spawn_scanner(self.registry(), self.config.scan_interval());
        *scanner = Some(handle);
        Some(rx)
    }

    /// Stops the scanner, closes every port and joins the reader threads.
    pub async fn shutdown(&self) {
        info!("monitor shutting down");
        self.running.store(false, Ordering::Relaxed);

        if let Some(scanner) = self.scanner.lock().await.take() {
            scanner.stop().await;
        }

        let readers: Vec<ReaderSlot> = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let joined = self
            .with_registry(move |registry| {
                registry.close_all();
                for slot in readers {
                    if slot.handle.join().is_err() {
                        error!("{}: reader thread panicked", slot.port);
                    }
                }
            })
            .await;
        if let Err(e) = joined {
            error!("shutdown task failed: {e}");
        }
    }
}
