#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(self.stdout.trim()).unwrap_or_else(|e| {
            panic!(
                "stdout is not JSON ({e}); see {}\n{}",
                self.log_path.display(),
                self.stdout
            )
        })
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_vmg") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "vmg.exe" } else { "vmg" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve vmg binary path for integration test"),
    }
}

/// Run the binary with a scrubbed `VMG_*` environment and `HOME` pointed at `home`.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("vmg-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    for (key, _) in std::env::vars() {
        if key.starts_with("VMG_") {
            command.env_remove(key);
        }
    }
    let output = command
        .args(args)
        .env("HOME", home)
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute vmg command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Write a config file using the in-memory lock store.
pub fn write_config(dir: &Path, root: &Path, threshold: &str) -> PathBuf {
    let path = dir.join("vmg.toml");
    let body = format!(
        "[volume]\nroot = \"{}\"\nthreshold = {threshold}\n\n\
         [lock_store]\nbackend = \"memory\"\n\n\
         [paths]\njsonl_log = \"{}\"\n",
        root.display(),
        dir.join("activity.jsonl").display(),
    );
    fs::write(&path, body).expect("write config");
    path
}
