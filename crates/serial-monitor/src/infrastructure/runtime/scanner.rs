//! Periodic enumeration and throughput tick.
//!
//! Once per period the scanner converts every session's byte counter into a
//! bytes-per-second figure and then rescans the OS port list, closing
//! sessions whose port vanished.  Each resulting snapshot is published on a
//! channel for whoever renders the port list.
//!
//! The registry work runs under `spawn_blocking`, since closing a port
//! waits for the handle to be released.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::service::SharedRegistry;
use crate::infrastructure::enumeration::PortSnapshot;

/// Snapshots buffered for a slow consumer before new ones are dropped.
const SNAPSHOT_BACKLOG: usize = 16;

/// Handle to a running scanner task.
pub struct ScannerHandle {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ScannerHandle {
    /// Stops the scanner and waits for its current tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("scanner task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Starts the scanner on the current Tokio runtime.
///
/// The first tick happens one `period` after the call, not immediately.
pub fn spawn_scanner(
    registry: SharedRegistry,
    period: Duration,
) -> (ScannerHandle, mpsc::Receiver<PortSnapshot>) {
    let (tx, rx) = mpsc::channel(SNAPSHOT_BACKLOG);
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip the immediate first tick.
        let mut last_tick = Instant::now();
        info!("port scanner running every {period:?}");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            let now = Instant::now();
            let elapsed = now - last_tick;
            last_tick = now;

            let guard = Arc::clone(&registry).lock_owned().await;
            let scanned = tokio::task::spawn_blocking(move || {
                let mut registry = guard;
                registry.account_throughput(elapsed);
                registry.scan()
            })
            .await;

            let snapshot = match scanned {
                Ok(Ok(snapshot)) => snapshot,
                // Already logged by the registry; keep the previous state.
                Ok(Err(_)) => continue,
                Err(e) => {
                    warn!("scan tick panicked: {e}");
                    continue;
                }
            };

            match tx.try_send(snapshot) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("snapshot consumer is behind; dropping snapshot");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        info!("port scanner stopped");
    });

    (ScannerHandle { task, shutdown }, rx)
}
