//! Per-volume classification: threshold, status ordering, and the volume report.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{ErrorBody, Result, VmgError};

/// Volume health, totally ordered `Ok < Full < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeStatus {
    Ok,
    Full,
    Error,
}

impl VolumeStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Full => "FULL",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fraction of total capacity that may be used, validated to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(VmgError::InvalidConfig {
                details: format!("threshold must be in [0, 1], got {value}"),
            });
        }
        Ok(Self(value))
    }

    /// Parse a textual threshold such as `"0.9"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw
            .trim()
            .parse::<f64>()
            .map_err(|error| VmgError::InvalidConfig {
                details: format!("threshold {raw:?} is not a number: {error}"),
            })?;
        Self::new(value)
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// `floor(total * threshold)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn allocated_bytes(self, total_bytes: u64) -> u64 {
        (total_bytes as f64 * self.0).floor() as u64
    }
}

/// Measured capacity of a healthy volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub total_bytes: u64,
    pub allocated_bytes: u64,
    pub used_bytes: u64,
}

impl Usage {
    #[must_use]
    pub const fn status(&self) -> VolumeStatus {
        if self.used_bytes >= self.allocated_bytes {
            VolumeStatus::Full
        } else {
            VolumeStatus::Ok
        }
    }
}

/// Either the measured sizes or the reason the volume could not be measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    Sized(Usage),
    Failed { error: ErrorBody },
}

/// Classification of one monitored volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReport {
    pub name: String,
    #[serde(flatten)]
    measurement: Measurement,
    status: VolumeStatus,
}

impl VolumeReport {
    /// Classify a measured volume; status follows `used >= floor(total * threshold)`.
    #[must_use]
    pub fn measured(
        name: impl Into<String>,
        total_bytes: u64,
        used_bytes: u64,
        threshold: Threshold,
    ) -> Self {
        let usage = Usage {
            total_bytes,
            allocated_bytes: threshold.allocated_bytes(total_bytes),
            used_bytes,
        };
        Self {
            name: name.into(),
            status: usage.status(),
            measurement: Measurement::Sized(usage),
        }
    }

    /// A volume that could not be measured; sizes are never recorded alongside an error.
    #[must_use]
    pub fn failed(name: impl Into<String>, error: &VmgError) -> Self {
        Self {
            name: name.into(),
            measurement: Measurement::Failed {
                error: ErrorBody::from(error),
            },
            status: VolumeStatus::Error,
        }
    }

    #[must_use]
    pub const fn status(&self) -> VolumeStatus {
        self.status
    }

    #[must_use]
    pub const fn usage(&self) -> Option<&Usage> {
        match &self.measurement {
            Measurement::Sized(usage) => Some(usage),
            Measurement::Failed { .. } => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&ErrorBody> {
        match &self.measurement {
            Measurement::Sized(_) => None,
            Measurement::Failed { error } => Some(error),
        }
    }
}
