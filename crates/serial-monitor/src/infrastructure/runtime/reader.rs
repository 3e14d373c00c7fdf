//! Per-port reader thread.
//!
//! Each open session gets one thread that repeatedly polls its transport and
//! feeds what arrives through the framer.  Because only this thread calls
//! `poll`, byte arrival for a given port is strictly serialised.
//!
//! # Read timeout
//!
//! The session lock is held for the duration of one `poll`, which blocks for
//! at most the port's read timeout (50 ms by default).  Callers of `send` or
//! `configure` therefore wait at most that long.  When nothing arrives the
//! thread backs off briefly before polling again so a transport that
//! returns immediately does not spin.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use crate::application::port_session::{lock_session, SharedSession};

/// Size of the scratch buffer handed to each read.
pub const READ_CHUNK: usize = 4096;

const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Spawns the reader thread for `session`.
///
/// The thread exits when the session is no longer open (closed by a caller,
/// by a scan, or by a transport fault) or when `running` is cleared.
///
/// # Errors
///
/// Returns the OS error if the thread could not be spawned.
pub fn spawn_reader(
    session: SharedSession,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let name = lock_session(&session).name().to_string();
    std::thread::Builder::new()
        .name(format!("serial-reader-{name}"))
        .spawn(move || {
            info!("{name}: reader started");
            reader_loop(&session, &running);
            info!("{name}: reader stopped");
        })
}

fn reader_loop(session: &SharedSession, running: &AtomicBool) {
    let mut scratch = vec![0u8; READ_CHUNK];

    while running.load(Ordering::Relaxed) {
        let polled = {
            let mut guard = lock_session(session);
            if !guard.is_open() {
                debug!("{}: session no longer open", guard.name());
                return;
            }
            guard.poll(&mut scratch)
        };

        match polled {
            Ok(0) => std::thread::sleep(IDLE_BACKOFF),
            Ok(_) => {}
            // The session has already closed itself and reported the fault.
            Err(_) => return,
        }
    }
}
