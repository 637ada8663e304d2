//! Scheduled checking loop.
//!
//! One thread: every `daemon.interval_secs` run a full check (scan, decide,
//! lock-store call), log it, then sleep until the next tick or a signal.
//! The lock store is built once on the first check and reused across ticks;
//! a reload only rebuilds it when the `[lock_store]` section changed.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::cycle::run_check;
use crate::control::lock_store::LazyLockStore;
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{check_failed_entry, record_check};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::platform::pal::{Platform, detect_platform};

/// Counters reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub checks: u64,
    pub failed_checks: u64,
    pub reloads: u64,
}

/// The checking daemon behind `vmg daemon`.
pub struct MonitorDaemon {
    config: Config,
    platform: Arc<dyn Platform>,
    store: LazyLockStore,
    writer: JsonlWriter,
    signals: SignalHandler,
    start_time: Instant,
    stats: DaemonStats,
}

impl MonitorDaemon {
    /// Build the daemon with the host platform and OS signal hooks.
    pub fn init(config: Config) -> Result<Self> {
        let platform = detect_platform()?;
        let store = LazyLockStore::from_config(config.lock_store.clone());
        Ok(Self::with_parts(config, platform, store, SignalHandler::new()))
    }

    #[must_use]
    pub fn with_parts(
        config: Config,
        platform: Arc<dyn Platform>,
        store: LazyLockStore,
        signals: SignalHandler,
    ) -> Self {
        let writer = JsonlWriter::open(JsonlConfig::from(&config.paths));
        Self {
            config,
            platform,
            store,
            writer,
            signals,
            start_time: Instant::now(),
            stats: DaemonStats::default(),
        }
    }

    /// Handle for requesting shutdown, reload, or an immediate check.
    #[must_use]
    pub fn signals(&self) -> SignalHandler {
        self.signals.clone()
    }

    #[must_use]
    pub const fn stats(&self) -> DaemonStats {
        self.stats
    }

    /// Run until shutdown is requested.
    pub fn run(&mut self) -> Result<DaemonStats> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.writer.write_entry(
            &LogEntry::new(EventType::DaemonStart, Severity::Info).with_details(format!(
                "version={} config_hash={config_hash} interval_secs={} backend={}",
                env!("CARGO_PKG_VERSION"),
                self.config.daemon.interval_secs,
                self.config.lock_store.backend.as_str(),
            )),
        );
        eprintln!(
            "[VMG-DAEMON] started: root={} interval={}s",
            self.config.volume.root.display(),
            self.config.daemon.interval_secs
        );

        loop {
            if self.signals.should_shutdown() {
                eprintln!("[VMG-DAEMON] shutdown requested");
                break;
            }
            if self.signals.should_reload() {
                self.handle_config_reload();
            }

            // A pending SIGUSR1 is satisfied by the check about to run.
            let _ = self.signals.should_check();
            self.check_once();

            self.signals
                .sleep_until_event(Duration::from_secs(self.config.daemon.interval_secs));
        }

        self.shutdown();
        Ok(self.stats)
    }

    /// One scheduled check. Failures are logged and never end the loop.
    pub fn check_once(&mut self) {
        self.stats.checks += 1;
        match run_check(&self.config, Arc::clone(&self.platform), &self.store) {
            Ok(outcome) => {
                if let Some(error) = outcome.report.system_error() {
                    eprintln!("[VMG-DAEMON] check degraded: [{}] {}", error.code, error.message);
                }
                record_check(&mut self.writer, &outcome);
            }
            Err(error) => {
                self.stats.failed_checks += 1;
                eprintln!("[VMG-DAEMON] check failed: {error}");
                self.writer.write_entry(&check_failed_entry(&error));
            }
        }
        self.writer.try_recover();
    }

    fn handle_config_reload(&mut self) {
        eprintln!("[VMG-DAEMON] config reload requested (SIGHUP)");

        let new_config = match Config::load(Some(&self.config.paths.config_file)) {
            Ok(config) => config,
            Err(error) => {
                eprintln!("[VMG-DAEMON] config reload failed: {error}");
                self.writer.write_entry(
                    &LogEntry::new(EventType::ConfigReload, Severity::Warning)
                        .with_error(error.code(), error.message())
                        .with_details("kept previous config"),
                );
                return;
            }
        };

        let old_hash = self.config.stable_hash().unwrap_or_default();
        let new_hash = new_config.stable_hash().unwrap_or_default();
        if old_hash == new_hash {
            eprintln!("[VMG-DAEMON] config unchanged, skipping reload");
            return;
        }

        if new_config.lock_store != self.config.lock_store {
            self.store.shutdown();
            self.store = LazyLockStore::from_config(new_config.lock_store.clone());
        }
        if new_config.paths != self.config.paths {
            self.writer.flush();
            self.writer = JsonlWriter::open(JsonlConfig::from(&new_config.paths));
        }

        self.writer.write_entry(
            &LogEntry::new(EventType::ConfigReload, Severity::Info)
                .with_details(format!("config hash: {old_hash} -> {new_hash}")),
        );
        self.config = new_config;
        self.stats.reloads += 1;
        eprintln!("[VMG-DAEMON] config reloaded successfully");
    }

    fn shutdown(&mut self) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.store.shutdown();
        self.writer.write_entry(
            &LogEntry::new(EventType::DaemonStop, Severity::Info).with_details(format!(
                "uptime_secs={uptime_secs} checks={} failed={}",
                self.stats.checks, self.stats.failed_checks
            )),
        );
        self.writer.flush();
        eprintln!("[VMG-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}
