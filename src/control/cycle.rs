//! One check: scan the volumes, then drive protective mode from the result.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::lock_store::LazyLockStore;
use crate::control::mode::{ModeController, ModeOutcome};
use crate::core::config::Config;
use crate::core::errors::{ErrorBody, Result};
use crate::monitor::report::SystemReport;
use crate::monitor::scanner::VolumeScanner;
use crate::platform::pal::Platform;

/// Result of a completed check. Hard failures are returned as `Err` instead.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub report: SystemReport,
    /// `None` when the lock store could not even be constructed.
    pub mode: Option<ModeOutcome>,
    /// Set when building the lock store failed.
    pub store_error: Option<ErrorBody>,
    pub duration: Duration,
}

/// Scan only; the lock store is never contacted.
pub fn run_scan_only(config: &Config, platform: Arc<dyn Platform>) -> Result<SystemReport> {
    VolumeScanner::from_config(&config.volume, platform)?.scan()
}

/// Scan, then apply the mode decision through the process-wide store.
///
/// Config and volume-root failures abort with `Err`. Lock-store failures,
/// including failing to build the store, land in the report's system error.
pub fn run_check(
    config: &Config,
    platform: Arc<dyn Platform>,
    store: &LazyLockStore,
) -> Result<CheckOutcome> {
    let started = Instant::now();
    let mut report = run_scan_only(config, platform)?;

    let (mode, store_error) = match store.get() {
        Ok(handle) => (
            Some(ModeController::new(handle.as_ref()).apply(&mut report)),
            None,
        ),
        Err(error) => {
            report.set_system_error(&error);
            (None, Some(ErrorBody::from(&error)))
        }
    };

    Ok(CheckOutcome {
        report,
        mode,
        store_error,
        duration: started.elapsed(),
    })
}
