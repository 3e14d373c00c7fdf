//! PortRegistry: the set of open sessions and the latest port snapshot.
//!
//! The registry is the monitor's in-memory view of the machine's serial
//! ports.  It tracks:
//!
//! - One [`SharedSession`] per open port, keyed by port name.
//! - The latest enumeration snapshot (description, manufacturer, busy flag,
//!   measured throughput) for every port the OS reports.
//!
//! # Scan merge (for beginners)
//!
//! Every scan diffs the new OS list against the previous snapshot:
//!
//! ```text
//! previous ∩ new   → entry kept, only `busy` refreshed
//! new \ previous   → entry added
//! previous \ new   → entry removed; its session (if any) is closed
//! ```
//!
//! Metadata of ports that stay present is not refreshed, so throughput
//! figures written by [`PortRegistry::account_throughput`]
//! survive between scans.
//!
//! # Sessions closing themselves
//!
//! A session that hits a transport fault closes itself from its reader
//! thread and announces its name on the registry's close channel.  Every
//! `&mut self` entry point drains that channel first, so a faulted session
//! never shows up in a query made after the fault.
//!
//! The registry itself is a plain struct; callers that share it across
//! tasks wrap it in a mutex.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::port_session::{
    lock_session, PortSession, PortSettings, SessionState, SharedSession,
};
use crate::infrastructure::enumeration::{EnumerationError, PortEnumerator, PortInfo, PortSnapshot};
use crate::infrastructure::transport::TransportFactory;

/// Coordinates the lifecycle of every open [`PortSession`].
pub struct PortRegistry {
    enumerator: Box<dyn PortEnumerator>,
    factory: Box<dyn TransportFactory>,
    sessions: HashMap<String, SharedSession>,
    snapshot: PortSnapshot,
    /// Connect failures for ports that have no registered session.
    last_errors: HashMap<String, String>,
    closed_tx: mpsc::UnboundedSender<String>,
    closed_rx: mpsc::UnboundedReceiver<String>,
}

impl PortRegistry {
    pub fn new(enumerator: Box<dyn PortEnumerator>, factory: Box<dyn TransportFactory>) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        Self {
            enumerator,
            factory,
            sessions: HashMap::new(),
            snapshot: PortSnapshot::new(),
            last_errors: HashMap::new(),
            closed_tx,
            closed_rx,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Refreshes the port snapshot and closes sessions whose port vanished.
    ///
    /// # Errors
    ///
    /// Returns the enumerator's error unchanged.  The previous snapshot and
    /// all sessions are left untouched in that case.
    pub fn scan(&mut self) -> Result<PortSnapshot, EnumerationError> {
        let ports = self.enumerator.enumerate().map_err(|e| {
            warn!("port scan failed: {e}");
            e
        })?;
        self.reap_closed();

        let mut next = PortSnapshot::with_capacity(ports.len());
        for reported in ports {
            let name = reported.name.clone();
            let busy = reported.busy || self.sessions.contains_key(&name);
            let info = match self.snapshot.remove(&name) {
                Some(mut existing) => {
                    existing.busy = busy;
                    existing
                }
                None => {
                    info!("port {name} appeared");
                    PortInfo { busy, ..reported }
                }
            };
            next.insert(name, info);
        }
        for gone in self.snapshot.keys() {
            info!("port {gone} disappeared");
        }
        self.snapshot = next;

        let vanished: Vec<String> = self
            .sessions
            .keys()
            .filter(|name| !self.snapshot.contains_key(*name))
            .cloned()
            .collect();
        for name in vanished {
            if let Some(session) = self.sessions.remove(&name) {
                warn!("closing {name}: port no longer enumerated");
                lock_session(&session).close();
            }
        }
        // The closures above queued their own notices.
        self.reap_closed();

        Ok(self.snapshot.clone())
    }

    /// Opens `name` with `settings`, or reconfigures and reconnects it if a
    /// session already exists.
    ///
    /// Returns `None` if the connection could not be established; the
    /// reason is then available from [`last_error`](Self::last_error).
    pub fn open(&mut self, name: &str, settings: PortSettings) -> Option<SharedSession> {
        self.reap_closed();

        if let Some(session) = self.sessions.get(name).cloned() {
            let result = {
                let mut guard = lock_session(&session);
                guard.configure(settings);
                guard.connect()
            };
            return match result {
                Ok(()) => {
                    self.last_errors.remove(name);
                    Some(session)
                }
                Err(err) => {
                    self.sessions.remove(name);
                    self.last_errors.insert(name.to_string(), err.to_string());
                    if let Some(info) = self.snapshot.get_mut(name) {
                        info.busy = false;
                    }
                    None
                }
            };
        }

        let mut session = PortSession::new(name, settings, self.factory.create(name));
        session.set_close_notifier(self.closed_tx.clone());
        match session.connect() {
            Ok(()) => {
                self.last_errors.remove(name);
                let shared = session.shared();
                self.sessions.insert(name.to_string(), shared.clone());
                if let Some(info) = self.snapshot.get_mut(name) {
                    info.busy = true;
                }
                Some(shared)
            }
            Err(err) => {
                self.last_errors.insert(name.to_string(), err.to_string());
                None
            }
        }
    }

    /// Closes and unregisters `name`.  Returns whether a session existed.
    pub fn close(&mut self, name: &str) -> bool {
        self.reap_closed();
        match self.sessions.remove(name) {
            Some(session) => {
                lock_session(&session).close();
                if let Some(info) = self.snapshot.get_mut(name) {
                    info.busy = false;
                }
                true
            }
            None => false,
        }
    }

    /// Closes every session.
    pub fn close_all(&mut self) {
        for (name, session) in self.sessions.drain() {
            debug!("closing {name}");
            lock_session(&session).close();
        }
        self.reap_closed();
    }

    /// Converts each session's byte counter into a bytes-per-second figure
    /// for `interval`, stores it in the snapshot and resets the counter.
    pub fn account_throughput(&mut self, interval: Duration) {
        self.reap_closed();
        let secs = interval.as_secs_f64();
        if secs <= 0.0 {
            warn!("ignoring throughput accounting over an empty interval");
            return;
        }

        for (name, session) in &self.sessions {
            let bytes = lock_session(session).take_bytes_read();
            let rate = bytes as f64 / secs;
            match self.snapshot.get_mut(name) {
                Some(info) => info.bytes_per_second = rate,
                None => debug!("{name}: {rate:.1} B/s (not in snapshot)"),
            }
        }
    }

    /// Drops sessions that closed themselves since the last call.
    fn reap_closed(&mut self) {
        while let Ok(name) = self.closed_rx.try_recv() {
            let closed = self
                .sessions
                .get(&name)
                .map(|s| lock_session(s).state() == SessionState::Closed)
                .unwrap_or(false);
            if !closed {
                continue;
            }
            if let Some(session) = self.sessions.remove(&name) {
                if let Some(err) = lock_session(&session).last_error() {
                    self.last_errors.insert(name.clone(), err.to_string());
                }
            }
            if let Some(info) = self.snapshot.get_mut(&name) {
                info.busy = false;
            }
            info!("{name}: session dropped after closing itself");
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Looks up an open session.
    pub fn session(&self, name: &str) -> Option<SharedSession> {
        self.sessions
            .get(name)
            .filter(|s| lock_session(s).state() != SessionState::Closed)
            .cloned()
    }

    /// Names of ports with an open session, sorted.
    pub fn active_ports(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| lock_session(s).is_open())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The latest snapshot, sorted by port name.
    pub fn port_list(&self) -> Vec<PortInfo> {
        let mut ports: Vec<PortInfo> = self.snapshot.values().cloned().collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        ports
    }

    pub fn port_info(&self, name: &str) -> Option<&PortInfo> {
        self.snapshot.get(name)
    }

    /// The most recent error reported for `name`, from a failed open or
    /// from its session.
    pub fn last_error(&self, name: &str) -> Option<String> {
        if let Some(session) = self.sessions.get(name) {
            if let Some(err) = lock_session(session).last_error() {
                return Some(err.to_string());
            }
        }
        self.last_errors.get(name).cloned()
    }
}
