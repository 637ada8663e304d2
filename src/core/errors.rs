//! VMG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, VmgError>;

/// Top-level error type for the volume mode guard.
#[derive(Debug, Error)]
pub enum VmgError {
    #[error("[VMG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[VMG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[VMG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[VMG-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[VMG-2001] failed to read volume root {path}: {details}")]
    VolumeRoot { path: PathBuf, details: String },

    #[error("[VMG-2002] volume is not mounted: {path}")]
    Unmounted { path: PathBuf },

    #[error("[VMG-2003] filesystem stats failure for {path}: {details}")]
    FsStats { path: PathBuf, details: String },

    #[error("[VMG-3001] lock store unavailable at {endpoint}: no connection within {waited_ms}ms")]
    LockStoreUnavailable { endpoint: String, waited_ms: u64 },

    #[error("[VMG-3002] lock store {operation} failed: {details}")]
    LockStore {
        operation: &'static str,
        details: String,
    },

    #[error("[VMG-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[VMG-3201] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[VMG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl VmgError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "VMG-1001",
            Self::MissingConfig { .. } => "VMG-1002",
            Self::ConfigParse { .. } => "VMG-1003",
            Self::UnsupportedPlatform { .. } => "VMG-1101",
            Self::VolumeRoot { .. } => "VMG-2001",
            Self::Unmounted { .. } => "VMG-2002",
            Self::FsStats { .. } => "VMG-2003",
            Self::LockStoreUnavailable { .. } => "VMG-3001",
            Self::LockStore { .. } => "VMG-3002",
            Self::Serialization { .. } => "VMG-3101",
            Self::Io { .. } => "VMG-3201",
            Self::Runtime { .. } => "VMG-3900",
        }
    }

    /// Human-readable message without the `[VMG-xxxx]` prefix.
    #[must_use]
    pub fn message(&self) -> String {
        let rendered = self.to_string();
        let prefix = format!("[{}] ", self.code());
        rendered
            .strip_prefix(&prefix)
            .map_or_else(|| rendered.clone(), str::to_string)
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::FsStats { .. }
                | Self::LockStoreUnavailable { .. }
                | Self::LockStore { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the failure aborts a whole check rather than degrading the report.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Wire form of an error as it appears in status documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&VmgError> for ErrorBody {
    fn from(value: &VmgError) -> Self {
        Self {
            code: value.code().to_string(),
            message: value.message(),
        }
    }
}

impl From<serde_json::Error> for VmgError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for VmgError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
