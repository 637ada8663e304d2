//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VmgError};

/// Upper bound on the connection wait before a lock-store call gives up.
const MAX_CONNECT_WAIT_MS: u64 = 60_000;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub volume: VolumeConfig,
    pub lock_store: LockStoreConfig,
    pub daemon: DaemonConfig,
    pub paths: PathsConfig,
}

/// Which directory holds the volumes and where "full" begins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumeConfig {
    pub root: PathBuf,
    /// Fraction of total capacity that may be used before a volume is FULL.
    pub threshold: f64,
}

/// Lock-store backend selection and client tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockStoreConfig {
    pub backend: LockStoreBackend,
    pub host: String,
    pub port: u16,
    /// How long a call waits for the connector before failing as unavailable.
    pub connect_wait_ms: u64,
    pub io_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
}

/// Registry key for the lock-store implementation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockStoreBackend {
    #[default]
    Memcached,
    Memory,
}

impl LockStoreBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memcached => "memcached",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for LockStoreBackend {
    type Err = VmgError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memcached" => Ok(Self::Memcached),
            "memory" => Ok(Self::Memory),
            other => Err(VmgError::InvalidConfig {
                details: format!("unknown lock_store.backend {other:?} (expected memcached|memory)"),
            }),
        }
    }
}

/// Scheduled-run settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub interval_secs: u64,
}

/// Filesystem paths used by vmg itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub jsonl_fallback: Option<PathBuf>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/volumes"),
            threshold: 0.9,
        }
    }
}

impl Default for LockStoreConfig {
    fn default() -> Self {
        Self {
            backend: LockStoreBackend::Memcached,
            host: "127.0.0.1".to_string(),
            port: 11211,
            connect_wait_ms: 1_000,
            io_timeout_ms: 2_000,
            reconnect_interval_ms: 500,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[VMG-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let data = home_dir.join(".local").join("share").join("vmg");
        Self {
            config_file: home_dir.join(".config").join("vmg").join("config.toml"),
            jsonl_log: data.join("activity.jsonl"),
            jsonl_fallback: None,
        }
    }
}

impl LockStoreConfig {
    /// `host:port` label used in logs and errors.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| VmgError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(VmgError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic FNV-1a hash of the effective config for log correlation.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("VMG_VOLUME_ROOT") {
            self.volume.root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("VMG_VOLUME_THRESHOLD") {
            self.volume.threshold = parse_env("VMG_VOLUME_THRESHOLD", &raw)?;
        }

        if let Some(raw) = lookup("VMG_LOCK_STORE_BACKEND") {
            self.lock_store.backend = raw.parse()?;
        }
        if let Some(raw) = lookup("VMG_LOCK_STORE_HOST") {
            self.lock_store.host = raw;
        }
        if let Some(raw) = lookup("VMG_LOCK_STORE_PORT") {
            self.lock_store.port = parse_env("VMG_LOCK_STORE_PORT", &raw)?;
        }
        if let Some(raw) = lookup("VMG_LOCK_STORE_CONNECT_WAIT_MS") {
            self.lock_store.connect_wait_ms = parse_env("VMG_LOCK_STORE_CONNECT_WAIT_MS", &raw)?;
        }
        if let Some(raw) = lookup("VMG_LOCK_STORE_IO_TIMEOUT_MS") {
            self.lock_store.io_timeout_ms = parse_env("VMG_LOCK_STORE_IO_TIMEOUT_MS", &raw)?;
        }

        if let Some(raw) = lookup("VMG_DAEMON_INTERVAL_SECS") {
            self.daemon.interval_secs = parse_env("VMG_DAEMON_INTERVAL_SECS", &raw)?;
        }

        if let Some(raw) = lookup("VMG_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    fn normalize_paths(&mut self) {
        let s = self.volume.root.to_string_lossy();
        if s.len() > 1
            && let Some(stripped) = s.strip_suffix('/')
        {
            self.volume.root = PathBuf::from(stripped);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.volume.root.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(VmgError::InvalidConfig {
                details: "volume.root must not be blank".to_string(),
            });
        }

        let threshold = self.volume.threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(VmgError::InvalidConfig {
                details: format!("volume.threshold must be in [0, 1], got {threshold}"),
            });
        }

        if self.lock_store.backend == LockStoreBackend::Memcached {
            if self.lock_store.host.trim().is_empty() {
                return Err(VmgError::InvalidConfig {
                    details: "lock_store.host must not be blank".to_string(),
                });
            }
            if self.lock_store.port == 0 {
                return Err(VmgError::InvalidConfig {
                    details: "lock_store.port must be in 1..=65535".to_string(),
                });
            }
        }

        if self.lock_store.connect_wait_ms > MAX_CONNECT_WAIT_MS {
            return Err(VmgError::InvalidConfig {
                details: format!(
                    "lock_store.connect_wait_ms must be <= {MAX_CONNECT_WAIT_MS}, got {}",
                    self.lock_store.connect_wait_ms
                ),
            });
        }
        if self.lock_store.io_timeout_ms == 0 || self.lock_store.reconnect_interval_ms == 0 {
            return Err(VmgError::InvalidConfig {
                details: "lock_store.io_timeout_ms and reconnect_interval_ms must be > 0"
                    .to_string(),
            });
        }

        if self.daemon.interval_secs == 0 {
            return Err(VmgError::InvalidConfig {
                details: "daemon.interval_secs must be >= 1".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| VmgError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, LockStoreBackend, VmgError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        for bad in [-0.01, 1.01, f64::NAN] {
            let mut cfg = Config::default();
            cfg.volume.threshold = bad;
            let err = cfg.validate().expect_err("threshold should be rejected");
            assert_eq!(err.code(), "VMG-1001");
        }
    }

    #[test]
    fn threshold_bounds_are_inclusive() {
        for ok in [0.0, 1.0] {
            let mut cfg = Config::default();
            cfg.volume.threshold = ok;
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn blank_root_rejected() {
        let mut cfg = Config::default();
        cfg.volume.root = PathBuf::from("   ");
        let err = cfg.validate().expect_err("blank root");
        match err {
            VmgError::InvalidConfig { details } => assert!(details.contains("volume.root")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn memory_backend_ignores_port() {
        let mut cfg = Config::default();
        cfg.lock_store.backend = LockStoreBackend::Memory;
        cfg.lock_store.port = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn memcached_backend_requires_port() {
        let mut cfg = Config::default();
        cfg.lock_store.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.daemon.interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("VMG_VOLUME_ROOT", "/srv/volumes/"),
            ("VMG_VOLUME_THRESHOLD", "0.75"),
            ("VMG_LOCK_STORE_BACKEND", "Memory"),
            ("VMG_LOCK_STORE_PORT", "11311"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("overrides should parse");
        cfg.normalize_paths();
        assert_eq!(cfg.volume.root, PathBuf::from("/srv/volumes"));
        assert!((cfg.volume.threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(cfg.lock_store.backend, LockStoreBackend::Memory);
        assert_eq!(cfg.lock_store.port, 11311);
    }

    #[test]
    fn non_numeric_threshold_env_rejected() {
        let env = vars(&[("VMG_VOLUME_THRESHOLD", "ninety")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("non-numeric threshold");
        assert_eq!(err.code(), "VMG-1003");
        assert!(err.is_config_error());
    }

    #[test]
    fn unknown_backend_rejected() {
        let err = "redis"
            .parse::<LockStoreBackend>()
            .expect_err("unknown backend");
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/vmg/config.toml")))
            .expect_err("missing explicit path");
        assert_eq!(err.code(), "VMG-1002");
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[volume]\nroot = \"/data/vols\"\nthreshold = 0.8\n\n[lock_store]\nbackend = \"memory\"\n",
        )
        .unwrap();
        let cfg = Config::load_with(Some(&path), |_| None).expect("load");
        assert_eq!(cfg.volume.root, PathBuf::from("/data/vols"));
        assert!((cfg.volume.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.lock_store.backend, LockStoreBackend::Memory);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn load_rejects_out_of_range_threshold_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[volume]\nthreshold = 1.5\n").unwrap();
        let err = Config::load_with(Some(&path), |_| None).expect_err("bad threshold");
        assert_eq!(err.code(), "VMG-1001");
    }

    #[test]
    fn stable_hash_deterministic_and_sensitive() {
        let cfg = Config::default();
        let a = cfg.stable_hash().unwrap();
        assert_eq!(a, cfg.stable_hash().unwrap());
        let mut changed = cfg;
        changed.volume.threshold = 0.5;
        assert_ne!(a, changed.stable_hash().unwrap());
    }
}
