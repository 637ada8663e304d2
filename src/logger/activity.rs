//! Maps check results to activity-log entries.

use crate::control::cycle::CheckOutcome;
use crate::control::mode::ModeDecision;
use crate::core::errors::{ErrorBody, VmgError};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};

/// Entries describing one completed check: the summary line, then the mode
/// action, then any lock-store failure.
#[must_use]
pub fn check_entries(outcome: &CheckOutcome) -> Vec<LogEntry> {
    let report = &outcome.report;
    let status = report.system_status().to_string();
    let duration_ms = u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX);
    let (ok, full, err) = report.status_counts();

    let mut summary = LogEntry::new(EventType::CheckComplete, Severity::Info)
        .with_details(format!("ok={ok} full={full} error={err}"));
    summary.system_status = Some(status.clone());
    summary.volumes = Some(report.len());
    summary.duration_ms = Some(duration_ms);
    if full > 0 || err > 0 {
        summary.severity = Severity::Warning;
    }

    let mut entries = vec![summary];

    if let Some(mode) = &outcome.mode {
        let mut entry = match &mode.decision {
            ModeDecision::Set { trigger } => {
                let mut e = LogEntry::new(EventType::ModeSet, Severity::Warning);
                e.trigger_volume = Some(trigger.clone());
                e
            }
            ModeDecision::Clear => LogEntry::new(EventType::ModeCleared, Severity::Info),
            ModeDecision::NoOp => LogEntry::new(EventType::ModeUnchanged, Severity::Warning)
                .with_details("volume errors without a full volume"),
        };
        entry.system_status = Some(status.clone());
        entries.push(entry);

        if let Some(error) = &mode.error {
            entries.push(store_failure(error, mode.decision.label()));
        }
    }

    if let Some(error) = &outcome.store_error {
        entries.push(store_failure(error, "open"));
    }

    entries
}

/// Entry for a check that aborted before producing a report.
#[must_use]
pub fn check_failed_entry(error: &VmgError) -> LogEntry {
    LogEntry::new(EventType::CheckFailed, Severity::Critical)
        .with_error(error.code(), error.message())
}

/// Write every entry of a completed check.
pub fn record_check(writer: &mut JsonlWriter, outcome: &CheckOutcome) {
    for entry in check_entries(outcome) {
        writer.write_entry(&entry);
    }
}

fn store_failure(error: &ErrorBody, action: &str) -> LogEntry {
    LogEntry::new(EventType::LockStoreFailure, Severity::Critical)
        .with_error(error.code.clone(), error.message.clone())
        .with_details(format!("action={action}"))
}
