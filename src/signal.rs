//! Shutdown signal handling for the consumer process.
//!
//! SIGINT and SIGTERM set a process-wide flag. The consumer loop polls it
//! between sweeps and between cores, so a signal never interrupts a packet
//! copy halfway.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TransportError;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_signal: libc::c_int) {
    // Only async-signal-safe work here: a single atomic store
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install the SIGINT/SIGTERM handler.
///
/// Returns the flag the handler sets. Installing twice is harmless.
pub fn install_shutdown_handler() -> Result<&'static AtomicBool, TransportError> {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        let handler = on_shutdown_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;

        // SAFETY: the handler only performs an atomic store.
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            return Err(TransportError::SignalInstall { source: io::Error::last_os_error() });
        }
    }

    log::debug!("shutdown handler installed for SIGINT and SIGTERM");
    Ok(&SHUTDOWN)
}
