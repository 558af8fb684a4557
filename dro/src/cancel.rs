//! Cooperative cancellation for the poll loop.
//!
//! A [`CancelToken`] is checked once per loop iteration; an exchange that is
//! already in flight always completes. [`CancelToken::on_interrupt`] wires the
//! token to SIGINT so Ctrl+C ends a session with its counters intact.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Flag set by the SIGINT handler.
static INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_interrupt(_signum: libc::c_int) {
    if let Some(flag) = INTERRUPT_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that is cancelled by SIGINT (Ctrl+C).
    ///
    /// The handler is process-wide and installed once; every call returns a
    /// token sharing the same flag.
    pub fn on_interrupt() -> std::io::Result<Self> {
        let flag = INTERRUPT_FLAG
            .get_or_init(|| Arc::new(AtomicBool::new(false)))
            .clone();

        // SAFETY: the handler only performs an atomic store on a flag that is
        // initialized before the handler is installed.
        let previous = unsafe {
            libc::signal(
                libc::SIGINT,
                handle_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t,
            )
        };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { flag })
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
