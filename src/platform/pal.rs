//! PAL trait and platform-specific filesystem capacity queries.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VmgError};

/// Filesystem capacity for the filesystem that holds a path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    /// Space available to an unprivileged caller (excludes root-reserved blocks).
    pub available_bytes: u64,
    pub is_readonly: bool,
}

impl FsStats {
    /// Used space as seen by the caller: `total - available`.
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

/// OS abstraction used by the volume scanner.
pub trait Platform: Send + Sync {
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
    fn name(&self) -> &'static str;
}

/// Unix implementation using `statvfs`.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct UnixPlatform;

#[cfg(unix)]
impl UnixPlatform {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl Platform for UnixPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| VmgError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        let fragment = stat.fragment_size();
        Ok(FsStats {
            total_bytes: stat.blocks().saturating_mul(fragment),
            free_bytes: stat.blocks_free().saturating_mul(fragment),
            available_bytes: stat.blocks_available().saturating_mul(fragment),
            is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
        })
    }

    fn name(&self) -> &'static str {
        "unix"
    }
}

/// In-memory implementation for deterministic tests: stats keyed by exact path.
#[derive(Debug, Default)]
pub struct MockPlatform {
    stats: RwLock<HashMap<PathBuf, FsStats>>,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register capacity for `path`; `used` is expressed as `total - available`.
    pub fn insert(&self, path: impl Into<PathBuf>, total_bytes: u64, used_bytes: u64) {
        let available = total_bytes.saturating_sub(used_bytes);
        self.stats.write().insert(
            path.into(),
            FsStats {
                total_bytes,
                free_bytes: available,
                available_bytes: available,
                is_readonly: false,
            },
        );
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        self.stats
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| VmgError::FsStats {
                path: path.to_path_buf(),
                details: "mock stats not found".to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(unix)]
    {
        Ok(Arc::new(UnixPlatform::new()))
    }
    #[cfg(not(unix))]
    {
        Err(VmgError::UnsupportedPlatform {
            details: "statvfs-based capacity queries need a Unix host".to_string(),
        })
    }
}
