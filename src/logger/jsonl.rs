//! JSONL logger: append-only line-delimited JSON for agent-friendly log consumption.
//!
//! Each line is a self-contained JSON object written with a single `write_all`
//! so a tailing reader never sees a partial line.
//!
//! Four-level fallback chain:
//! 1. Primary file path
//! 2. Fallback path (optional, e.g. on another filesystem)
//! 3. stderr with `[VMG-JSONL]` prefix
//! 4. Silent discard (a check must never fail because logging failed)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VmgError};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CheckComplete,
    CheckFailed,
    ModeSet,
    ModeCleared,
    ModeUnchanged,
    LockStoreFailure,
    DaemonStart,
    DaemonStop,
    ConfigReload,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_status: Option<String>,
    /// Number of volumes in the report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<usize>,
    /// First FULL volume, for mode changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            system_status: None,
            volumes: None,
            trigger_volume: None,
            duration_ms: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Fallback,
    Stderr,
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Maximum file size before rotation (bytes). Default: 16 MiB.
    pub max_size_bytes: u64,
    /// Number of rotated files to keep. Default: 3.
    pub max_rotated_files: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/vmg/activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl From<&crate::core::config::PathsConfig> for JsonlConfig {
    fn from(paths: &crate::core::config::PathsConfig) -> Self {
        Self {
            path: paths.jsonl_log.clone(),
            fallback_path: paths.jsonl_fallback.clone(),
            ..Self::default()
        }
    }
}

/// Append-only JSONL log writer with rotation and multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl JsonlWriter {
    /// Open the JSONL log file. Falls through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        w.try_open_primary();
        w
    }

    /// Write a single entry as one JSONL line and flush it.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[VMG-JSONL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
        self.flush();
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Try reopening the primary path after a degradation.
    pub fn try_recover(&mut self) {
        if self.state == WriterState::Normal {
            return;
        }
        if let Ok((file, size)) = open_append(&self.config.path) {
            self.writer = Some(BufWriter::new(file));
            self.state = WriterState::Normal;
            self.bytes_written = size;
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        if self.bytes_written + line.len() as u64 > self.config.max_size_bytes
            && matches!(self.state, WriterState::Normal | WriterState::Fallback)
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.write_line(line);
                        return;
                    }
                    self.bytes_written += line.len() as u64;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[VMG-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::new(file));
                self.state = WriterState::Normal;
                self.bytes_written = size;
            }
            Err(_) => self.try_open_fallback(),
        }
    }

    fn try_open_fallback(&mut self) {
        let Some(fb) = self.config.fallback_path.clone() else {
            self.state = WriterState::Stderr;
            let _ = writeln!(
                io::stderr(),
                "[VMG-JSONL] primary path failed and no fallback configured, using stderr"
            );
            return;
        };
        match open_append(&fb) {
            Ok((file, size)) => {
                let _ = writeln!(
                    io::stderr(),
                    "[VMG-JSONL] primary path failed, using fallback: {}",
                    fb.display()
                );
                self.writer = Some(BufWriter::new(file));
                self.state = WriterState::Fallback;
                self.bytes_written = size;
            }
            Err(_) => {
                self.state = WriterState::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "[VMG-JSONL] both primary and fallback paths failed, using stderr"
                );
            }
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.state {
            WriterState::Normal => self.try_open_fallback(),
            WriterState::Fallback => self.state = WriterState::Stderr,
            WriterState::Stderr => self.state = WriterState::Discard,
            WriterState::Discard => {}
        }
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;

        let base = match self.state {
            WriterState::Normal => self.config.path.clone(),
            WriterState::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
            _ => return,
        };

        // .N-1 → .N, …, .1 → .2, current → .1
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::new(file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| VmgError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| VmgError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
