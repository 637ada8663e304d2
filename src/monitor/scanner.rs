//! Volume scanner: one synchronous pass over the immediate subdirectories of the
//! volume root, classifying each as a volume.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::VolumeConfig;
use crate::core::errors::{Result, VmgError};
use crate::monitor::report::SystemReport;
use crate::monitor::volume::{Threshold, VolumeReport};
use crate::platform::pal::Platform;

/// Marker file whose presence inside a volume directory means "not mounted".
pub const UNMOUNTED_MARKER: &str = ".unmounted";

/// Classifies every subdirectory of a root directory against a threshold.
pub struct VolumeScanner {
    root: PathBuf,
    threshold: Threshold,
    platform: Arc<dyn Platform>,
}

impl std::fmt::Debug for VolumeScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeScanner")
            .field("root", &self.root)
            .field("threshold", &self.threshold)
            .field("platform", &self.platform.name())
            .finish()
    }
}

impl VolumeScanner {
    /// Validate inputs before any filesystem access; a blank root is a config error.
    pub fn new(
        root: impl Into<PathBuf>,
        threshold: Threshold,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let root = root.into();
        if root.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(VmgError::InvalidConfig {
                details: "volume root path must not be blank".to_string(),
            });
        }
        Ok(Self {
            root,
            threshold,
            platform,
        })
    }

    /// Build from textual configuration values (root may be absent).
    pub fn from_raw(
        root: Option<&str>,
        threshold: &str,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let root = root.ok_or_else(|| VmgError::InvalidConfig {
            details: "volume root path is not configured".to_string(),
        })?;
        Self::new(root, Threshold::parse(threshold)?, platform)
    }

    pub fn from_config(config: &VolumeConfig, platform: Arc<dyn Platform>) -> Result<Self> {
        Self::new(config.root.clone(), Threshold::new(config.threshold)?, platform)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Enumerate and classify volumes in directory order.
    ///
    /// Fails only when the root itself is unusable; per-volume problems become
    /// ERROR entries and the scan continues.
    pub fn scan(&self) -> Result<SystemReport> {
        let meta = fs::metadata(&self.root).map_err(|error| VmgError::VolumeRoot {
            path: self.root.clone(),
            details: error.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(VmgError::VolumeRoot {
                path: self.root.clone(),
                details: "not a directory".to_string(),
            });
        }
        let entries = fs::read_dir(&self.root).map_err(|error| VmgError::VolumeRoot {
            path: self.root.clone(),
            details: error.to_string(),
        })?;

        let mut report = SystemReport::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    // No name to attach a report to.
                    eprintln!(
                        "[VMG-SCAN] skipping unreadable entry under {}: {error}",
                        self.root.display()
                    );
                    continue;
                }
            };
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            // Follows symlinks so a link to a mounted directory counts as a volume.
            match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => continue,
                Err(error) => {
                    report.push(VolumeReport::failed(name, &VmgError::io(&path, error)));
                    continue;
                }
            }

            report.push(self.classify(name, &path));
        }
        Ok(report)
    }

    fn classify(&self, name: String, path: &Path) -> VolumeReport {
        let marker = path.join(UNMOUNTED_MARKER);
        match marker.try_exists() {
            Ok(true) => {
                return VolumeReport::failed(
                    name,
                    &VmgError::Unmounted {
                        path: path.to_path_buf(),
                    },
                );
            }
            Ok(false) => {}
            Err(error) => return VolumeReport::failed(name, &VmgError::io(&marker, error)),
        }

        match self.platform.fs_stats(path) {
            Ok(stats) => {
                VolumeReport::measured(name, stats.total_bytes, stats.used_bytes(), self.threshold)
            }
            Err(error) => VolumeReport::failed(name, &error),
        }
    }
}
