//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use volume_mode_guard::control::cycle::{CheckOutcome, run_check, run_scan_only};
use volume_mode_guard::control::lock_store::LazyLockStore;
use volume_mode_guard::control::mode::ModeDecision;
use volume_mode_guard::core::config::Config;
use volume_mode_guard::core::errors::VmgError;
use volume_mode_guard::daemon::loop_main::MonitorDaemon;
use volume_mode_guard::logger::activity::{check_failed_entry, record_check};
use volume_mode_guard::logger::jsonl::{JsonlConfig, JsonlWriter};
use volume_mode_guard::monitor::report::SystemReport;
use volume_mode_guard::monitor::volume::VolumeStatus;
use volume_mode_guard::platform::pal::detect_platform;

/// Volume Mode Guard: watches storage volumes and toggles protective read/delete mode.
#[derive(Debug, Parser)]
#[command(
    name = "vmg",
    author,
    version,
    about = "Volume Mode Guard - capacity watchdog for storage volumes",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run one check: scan volumes, then set or clear protective mode.
    Check,
    /// Scan volumes and print the report without touching the lock store.
    Scan,
    /// Run checks on a fixed interval until signalled.
    Daemon,
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// Top-level CLI error with an exit-code contract.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration or user input.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) | Self::Json(_) => 2,
        }
    }
}

impl From<VmgError> for CliError {
    fn from(error: VmgError) -> Self {
        if error.is_config_error() {
            Self::User(error.to_string())
        } else {
            Self::Runtime(error.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Check => run_check_command(cli),
        Command::Scan => run_scan_command(cli),
        Command::Daemon => run_daemon(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn run_check_command(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let platform = detect_platform()?;
    let store = LazyLockStore::from_config(config.lock_store.clone());
    let mut writer = JsonlWriter::open(JsonlConfig::from(&config.paths));

    let result = run_check(&config, platform, &store);
    store.shutdown();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            writer.write_entry(&check_failed_entry(&error));
            return Err(error.into());
        }
    };
    record_check(&mut writer, &outcome);

    match output_mode(cli) {
        OutputMode::Json => write_document(&outcome.report),
        OutputMode::Human => {
            print_report_human(&outcome.report);
            print_mode_human(&outcome);
            Ok(())
        }
    }
}

fn run_scan_command(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let report = run_scan_only(&config, detect_platform()?)?;

    match output_mode(cli) {
        OutputMode::Json => write_document(&report),
        OutputMode::Human => {
            print_report_human(&report);
            Ok(())
        }
    }
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let mut daemon = MonitorDaemon::init(config)?;
    let stats = daemon.run()?;

    if output_mode(cli) == OutputMode::Json {
        write_json_line(&json!({
            "command": "daemon",
            "checks": stats.checks,
            "failed_checks": stats.failed_checks,
            "reloads": stats.reloads,
        }))?;
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": { "code": e.code(), "message": e.message() },
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── human output ────────────────────

fn print_report_human(report: &SystemReport) {
    println!(
        "{:<24} {:<6} {:>10} {:>10} {:>10}",
        "VOLUME".bold(),
        "STATUS".bold(),
        "TOTAL".bold(),
        "ALLOCATED".bold(),
        "USED".bold()
    );

    for volume in report.volumes() {
        let status = paint_status(volume.status(), &format!("{:<6}", volume.status()));
        let name = truncate_name(&volume.name, 24);
        match (volume.usage(), volume.error()) {
            (Some(usage), _) => println!(
                "{name:<24} {status} {:>10} {:>10} {:>10}",
                format_bytes(usage.total_bytes),
                format_bytes(usage.allocated_bytes),
                format_bytes(usage.used_bytes),
            ),
            (None, Some(error)) => {
                println!("{name:<24} {status} [{}] {}", error.code, error.message.dimmed());
            }
            (None, None) => println!("{name:<24} {status}"),
        }
    }

    if report.is_empty() {
        println!("  (no volumes found)");
    }

    let (ok, full, err) = report.status_counts();
    println!();
    println!(
        "System status: {}  ({ok} ok, {full} full, {err} error)",
        paint_status(report.system_status(), &report.system_status().to_string()).bold()
    );
    if let Some(error) = report.system_error() {
        println!("System error:  [{}] {}", error.code, error.message.red());
    }
}

fn print_mode_human(outcome: &CheckOutcome) {
    let Some(mode) = &outcome.mode else {
        println!("Protective mode: {}", "lock store unavailable".red());
        return;
    };
    let action = match &mode.decision {
        ModeDecision::Set { trigger } => {
            format!("set (first full volume: {trigger})").yellow()
        }
        ModeDecision::Clear => "cleared".green(),
        ModeDecision::NoOp => {
            "unchanged (volume errors present)".normal()
        }
    };
    let suffix = if mode.succeeded() { "" } else { " [FAILED]" };
    println!(
        "Protective mode: {action}{}  in {}ms",
        suffix.red(),
        outcome.duration.as_millis()
    );
}

fn paint_status(status: VolumeStatus, text: &str) -> colored::ColoredString {
    match status {
        VolumeStatus::Ok => text.green(),
        VolumeStatus::Full => text.yellow(),
        VolumeStatus::Error => text.red(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let tail: String = name
        .chars()
        .rev()
        .take(max_len.saturating_sub(3))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

// ──────────────────── JSON output ────────────────────

fn write_document(report: &SystemReport) -> Result<(), CliError> {
    let document = report.to_json()?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{document}")?;
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("VMG_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
