//! Graceful shutdown via a process-wide atomic flag
//!
//! Checked between pages and between targets; an in-flight request is
//! never cancelled.

use std::sync::atomic::{AtomicBool, Ordering};

/// Global shutdown flag, set by the SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers)
pub fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Relaxed);
}

/// Stop condition polled by long-running loops.
///
/// Defaults to the global flag; tests hand in their own.
#[derive(Debug, Clone, Copy)]
pub struct StopFlag(&'static AtomicBool);

impl StopFlag {
    pub fn global() -> Self {
        Self(shutdown_flag())
    }

    pub fn custom(flag: &'static AtomicBool) -> Self {
        Self(flag)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::global()
    }
}
