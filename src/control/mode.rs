//! Protective-mode controller: maps a system report to at most one lock-store call.
//!
//! The decision is a forward pass in scan order that stops at the first FULL
//! volume. It is independent of the report's max-folded system
//! status: any ERROR seen before the first FULL does not prevent the set, and
//! anything after it is never looked at.

#![allow(missing_docs)]

use serde::Serialize;

use crate::control::lock_store::{LOCK_KEY, LockStore};
use crate::core::errors::ErrorBody;
use crate::monitor::report::SystemReport;
use crate::monitor::volume::{VolumeReport, VolumeStatus};

/// Terminal state of one decision pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModeDecision {
    /// Enter protective mode; `trigger` is the first FULL volume in scan order.
    Set { trigger: String },
    /// Leave protective mode; every volume is OK (or there are none).
    Clear,
    /// Leave the lock untouched; some volume is ERROR and none is FULL.
    NoOp,
}

impl ModeDecision {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Clear => "clear",
            Self::NoOp => "noop",
        }
    }
}

/// What the controller did and whether the lock-store call failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeOutcome {
    pub decision: ModeDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ModeOutcome {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Sequential scan with early exit on the first FULL volume.
#[must_use]
pub fn decide(volumes: &[VolumeReport]) -> ModeDecision {
    let mut saw_error = false;
    for volume in volumes {
        match volume.status() {
            VolumeStatus::Full => {
                return ModeDecision::Set {
                    trigger: volume.name.clone(),
                };
            }
            VolumeStatus::Error => saw_error = true,
            VolumeStatus::Ok => {}
        }
    }
    if saw_error {
        ModeDecision::NoOp
    } else {
        ModeDecision::Clear
    }
}

/// Applies [`decide`] through a lock store. Holds no state between calls.
pub struct ModeController<'a> {
    store: &'a dyn LockStore,
}

impl<'a> ModeController<'a> {
    #[must_use]
    pub fn new(store: &'a dyn LockStore) -> Self {
        Self { store }
    }

    /// Issue at most one lock-store call; a failure is attached to `report`
    /// as its system error and never retried.
    pub fn apply(&self, report: &mut SystemReport) -> ModeOutcome {
        let decision = decide(report.volumes());
        let result = match &decision {
            ModeDecision::Set { .. } => report
                .to_json()
                .and_then(|payload| self.store.set(LOCK_KEY, &payload)),
            ModeDecision::Clear => self.store.clear(LOCK_KEY),
            ModeDecision::NoOp => Ok(()),
        };

        let error = match result {
            Ok(()) => None,
            Err(error) => {
                report.set_system_error(&error);
                Some(ErrorBody::from(&error))
            }
        };
        ModeOutcome { decision, error }
    }
}
