//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use volume_mode_guard::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, LockStoreBackend};
pub use crate::core::errors::{ErrorBody, Result, VmgError};

// Platform
pub use crate::platform::pal::{FsStats, Platform, detect_platform};

// Monitor
pub use crate::monitor::report::SystemReport;
pub use crate::monitor::scanner::VolumeScanner;
pub use crate::monitor::volume::{Threshold, VolumeReport, VolumeStatus};

// Control
pub use crate::control::cycle::{CheckOutcome, run_check, run_scan_only};
pub use crate::control::lock_store::{LOCK_KEY, LazyLockStore, LockStore, open_lock_store};
pub use crate::control::mode::{ModeController, ModeDecision, ModeOutcome};
