//! System report: ordered volume classifications with a max-folded system status.
//!
//! The system status is folded as volumes are appended (`max` under
//! `OK < FULL < ERROR`), so it does not depend on enumeration order. A
//! control-layer error attached afterwards forces the status to ERROR without
//! touching any individual volume entry.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::{ErrorBody, Result, VmgError};
use crate::monitor::volume::{VolumeReport, VolumeStatus};

/// One scan's classifications plus the derived system status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemReport {
    volumes: Vec<VolumeReport>,
    system_status: VolumeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl Default for SystemReport {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemReport {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            volumes: Vec::new(),
            system_status: VolumeStatus::Ok,
            error: None,
        }
    }

    /// Append a volume and fold its status into the system status.
    pub fn push(&mut self, volume: VolumeReport) {
        self.system_status = self.system_status.max(volume.status());
        self.volumes.push(volume);
    }

    /// Attach a control-layer error; the system status becomes ERROR.
    pub fn set_system_error(&mut self, error: &VmgError) {
        self.error = Some(ErrorBody::from(error));
        self.system_status = VolumeStatus::Error;
    }

    #[must_use]
    pub fn volumes(&self) -> &[VolumeReport] {
        &self.volumes
    }

    #[must_use]
    pub const fn system_status(&self) -> VolumeStatus {
        self.system_status
    }

    #[must_use]
    pub const fn system_error(&self) -> Option<&ErrorBody> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Count of volumes per status, in `(ok, full, error)` order.
    #[must_use]
    pub fn status_counts(&self) -> (usize, usize, usize) {
        self.volumes
            .iter()
            .fold((0, 0, 0), |(ok, full, err), v| match v.status() {
                VolumeStatus::Ok => (ok + 1, full, err),
                VolumeStatus::Full => (ok, full + 1, err),
                VolumeStatus::Error => (ok, full, err + 1),
            })
    }

    /// Render the caller-facing status document: `{"status": {...}}`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&StatusDocument::borrowed(self))?)
    }

    /// Pretty-printed variant of [`Self::to_json`].
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&StatusDocument::borrowed(
            self,
        ))?)
    }

    /// Parse a status document produced by [`Self::to_json`].
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: StatusDocument<'static> = serde_json::from_str(raw)?;
        Ok(doc.status.into_owned())
    }
}

#[derive(Serialize, Deserialize)]
struct StatusDocument<'a> {
    status: std::borrow::Cow<'a, SystemReport>,
}

impl<'a> StatusDocument<'a> {
    const fn borrowed(report: &'a SystemReport) -> Self {
        Self {
            status: std::borrow::Cow::Borrowed(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::volume::Threshold;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn volume(name: &str, status: VolumeStatus) -> VolumeReport {
        let t = Threshold::new(0.5).unwrap();
        match status {
            VolumeStatus::Ok => VolumeReport::measured(name, 100, 10, t),
            VolumeStatus::Full => VolumeReport::measured(name, 100, 90, t),
            VolumeStatus::Error => VolumeReport::failed(
                name,
                &VmgError::Unmounted {
                    path: PathBuf::from(format!("/volumes/{name}")),
                },
            ),
        }
    }

    fn status_strategy() -> impl Strategy<Value = VolumeStatus> {
        prop_oneof![
            Just(VolumeStatus::Ok),
            Just(VolumeStatus::Full),
            Just(VolumeStatus::Error),
        ]
    }

    #[test]
    fn empty_report_is_ok() {
        let report = SystemReport::new();
        assert!(report.is_empty());
        assert_eq!(report.system_status(), VolumeStatus::Ok);
        assert!(report.system_error().is_none());
    }

    #[test]
    fn fold_takes_worst_status() {
        let mut report = SystemReport::new();
        report.push(volume("a", VolumeStatus::Ok));
        assert_eq!(report.system_status(), VolumeStatus::Ok);
        report.push(volume("b", VolumeStatus::Full));
        assert_eq!(report.system_status(), VolumeStatus::Full);
        report.push(volume("c", VolumeStatus::Error));
        assert_eq!(report.system_status(), VolumeStatus::Error);
        report.push(volume("d", VolumeStatus::Ok));
        assert_eq!(report.system_status(), VolumeStatus::Error);
        assert_eq!(report.status_counts(), (2, 1, 1));
    }

    #[test]
    fn system_error_forces_error_without_touching_volumes() {
        let mut report = SystemReport::new();
        report.push(volume("a", VolumeStatus::Ok));
        report.set_system_error(&VmgError::LockStore {
            operation: "delete",
            details: "connection reset".to_string(),
        });
        assert_eq!(report.system_status(), VolumeStatus::Error);
        assert_eq!(report.volumes()[0].status(), VolumeStatus::Ok);
        assert_eq!(report.system_error().unwrap().code, "VMG-3002");
    }

    #[test]
    fn second_system_error_wins() {
        let mut report = SystemReport::new();
        report.set_system_error(&VmgError::Runtime {
            details: "first".to_string(),
        });
        report.set_system_error(&VmgError::LockStoreUnavailable {
            endpoint: "127.0.0.1:11211".to_string(),
            waited_ms: 5,
        });
        assert_eq!(report.system_status(), VolumeStatus::Error);
        assert_eq!(report.system_error().unwrap().code, "VMG-3001");
    }

    #[test]
    fn document_shape() {
        let mut report = SystemReport::new();
        report.push(volume("v1", VolumeStatus::Ok));
        report.push(volume("v2", VolumeStatus::Error));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let status = &json["status"];
        assert_eq!(status["systemStatus"], "ERROR");
        assert_eq!(status["volumes"][0]["name"], "v1");
        assert_eq!(status["volumes"][0]["totalBytes"], 100);
        assert_eq!(status["volumes"][1]["error"]["code"], "VMG-2002");
        assert!(status.get("error").is_none());
    }

    #[test]
    fn document_parses_back() {
        let mut report = SystemReport::new();
        report.push(volume("v1", VolumeStatus::Full));
        report.push(volume("v2", VolumeStatus::Error));
        report.set_system_error(&VmgError::LockStoreUnavailable {
            endpoint: "cache:11211".to_string(),
            waited_ms: 1000,
        });
        let parsed = SystemReport::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed, report);
        assert_eq!(
            parsed.system_error().unwrap().message,
            "lock store unavailable at cache:11211: no connection within 1000ms"
        );
    }

    #[test]
    fn serialization_does_not_mutate() {
        let mut report = SystemReport::new();
        report.push(volume("v1", VolumeStatus::Full));
        let before = report.clone();
        let _ = report.to_json().unwrap();
        let _ = report.to_json_pretty().unwrap();
        assert_eq!(report, before);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn system_status_independent_of_order(
            statuses in prop::collection::vec(status_strategy(), 0..12),
            seed in any::<u64>(),
        ) {
            let mut forward = SystemReport::new();
            for (i, s) in statuses.iter().enumerate() {
                forward.push(volume(&format!("v{i}"), *s));
            }

            // Deterministic shuffle driven by the seed.
            let mut shuffled: Vec<(usize, VolumeStatus)> =
                statuses.iter().copied().enumerate().collect();
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                #[allow(clippy::cast_possible_truncation)]
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }
            let mut permuted = SystemReport::new();
            for (i, s) in shuffled {
                permuted.push(volume(&format!("v{i}"), s));
            }

            let expected = statuses.iter().copied().max().unwrap_or(VolumeStatus::Ok);
            prop_assert_eq!(forward.system_status(), expected);
            prop_assert_eq!(permuted.system_status(), expected);
        }
    }
}
