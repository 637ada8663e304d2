//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! SIGUSR1 immediate check.
//!
//! Uses the `signal-hook` crate for safe signal registration. The daemon loop
//! polls `SignalHandler` flags instead of blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Granularity of [`SignalHandler::sleep_until_event`].
const POLL_SLICE: Duration = Duration::from_millis(200);

/// Signal state shared between the OS handlers and the daemon loop.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    check_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// SIGTERM/SIGINT -> shutdown, SIGHUP -> reload, SIGUSR1 -> check now.
    /// Registration is best-effort; failures go to stderr.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// A handler with no OS hooks; driven only through the `request_*` methods.
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            check_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check and clear the reload flag.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check and clear the immediate-check flag.
    pub fn should_check(&self) -> bool {
        self.check_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_check(&self) {
        self.check_flag.store(true, Ordering::Relaxed);
    }

    /// Sleep for up to `interval`, waking early once any flag is raised.
    /// Flags are left raised for the caller to consume.
    pub fn sleep_until_event(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        loop {
            if self.should_shutdown()
                || self.reload_flag.load(Ordering::Relaxed)
                || self.check_flag.load(Ordering::Relaxed)
            {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            thread::sleep(remaining.min(POLL_SLICE));
        }
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[VMG-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[VMG-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[VMG-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.check_flag)) {
                eprintln!("[VMG-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
