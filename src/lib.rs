#![forbid(unsafe_code)]

//! Volume Mode Guard (vmg): watches a directory of mounted storage volumes and
//! toggles a cluster-wide "protective read/delete mode" flag in a shared lock
//! store when any volume crosses its capacity threshold.
//!
//! A check has two halves:
//! 1. **Collect**: [`monitor::scanner::VolumeScanner`] classifies every volume
//!    as OK, FULL or ERROR and folds them into a [`monitor::report::SystemReport`].
//! 2. **Decide**: [`control::mode::ModeController`] sets or clears the lock
//!    through a [`control::lock_store::LockStore`].
//!
//! # Library usage
//!
//! ```rust,no_run
//! use volume_mode_guard::prelude::*;
//! ```

pub mod prelude;

pub mod control;
pub mod core;
#[cfg(feature = "daemon")]
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod platform;
