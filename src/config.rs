use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::broadcast;
use crate::session::DEFAULT_EVENT_LOG_CAPACITY;

const ENV_PREFIX: &str = "PITWALL_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid value `{value}` for {name}")]
    Env { name: String, value: String },
    #[error("Rig id {0} is configured more than once")]
    DuplicateRigId(String),
    #[error("Port {0} is configured for more than one rig")]
    DuplicatePort(u16),
    #[error("At least one rig must be configured")]
    NoRigs,
    #[error("Invalid setting {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RigConfig {
    pub id: String,
    pub port: u16,
}

impl RigConfig {
    pub fn new(id: impl Into<String>, port: u16) -> RigConfig {
        RigConfig {
            id: id.into(),
            port,
        }
    }
}

/// Exponential backoff for socket read errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub factor: u32,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_ms: 50,
            factor: 2,
            max_ms: 5000,
        }
    }
}

impl BackoffConfig {
    /// Delay before retrying after `failures` consecutive failed reads.
    pub fn delay(&self, failures: u32) -> Duration {
        let multiplier = u64::from(self.factor.max(1)).saturating_pow(failures);
        Duration::from_millis(self.initial_ms.saturating_mul(multiplier).min(self.max_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: IpAddr,
    pub rigs: Vec<RigConfig>,
    pub recordings_dir: PathBuf,
    pub leaderboard_path: PathBuf,
    pub snapshot_interval_ms: u64,
    pub event_log_capacity: usize,
    pub broadcast_capacity: usize,
    /// How recently a packet must have arrived for a rig to count as receiving
    pub receiving_window_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            rigs: vec![RigConfig::new("RIG_A", 20777), RigConfig::new("RIG_B", 20778)],
            recordings_dir: PathBuf::from("recordings"),
            leaderboard_path: PathBuf::from("data/laps.jsonl"),
            snapshot_interval_ms: 16,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            broadcast_capacity: broadcast::DEFAULT_CAPACITY,
            receiving_window_ms: 5000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Config {
    /// Read the file if given, apply environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        let config = config.with_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `PITWALL_*` overrides from the given variables. Unrelated variables are ignored.
    pub fn with_env<I>(mut self, vars: I) -> Result<Config, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let key = match name.strip_prefix(ENV_PREFIX) {
                Some(key) => key,
                None => continue,
            };
            match key {
                "BIND_ADDRESS" => self.bind_address = parse_env(&name, &value)?,
                "RECORDINGS_DIR" => self.recordings_dir = PathBuf::from(&value),
                "LEADERBOARD_PATH" => self.leaderboard_path = PathBuf::from(&value),
                "SNAPSHOT_INTERVAL_MS" => self.snapshot_interval_ms = parse_env(&name, &value)?,
                _ => {
                    let rig = key
                        .strip_prefix("RIG_")
                        .and_then(|rest| rest.strip_suffix("_PORT"))
                        .filter(|id| !id.is_empty());
                    if let Some(id) = rig {
                        let port = parse_env(&name, &value)?;
                        self.set_rig_port(id, port);
                    }
                }
            }
            debug!("Applied {} from the environment", name);
        }
        Ok(self)
    }

    // `A` and `RIG_A` both name rig RIG_A, unknown ids add a rig
    fn set_rig_port(&mut self, id: &str, port: u16) {
        let full_id = if id.to_ascii_uppercase().starts_with("RIG_") {
            id.to_string()
        } else {
            format!("RIG_{}", id)
        };
        let existing = self.rigs.iter_mut().find(|rig| {
            rig.id.eq_ignore_ascii_case(&full_id) || rig.id.eq_ignore_ascii_case(id)
        });
        match existing {
            Some(rig) => rig.port = port,
            None => self.rigs.push(RigConfig::new(full_id, port)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rigs.is_empty() {
            return Err(ConfigError::NoRigs);
        }
        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for rig in &self.rigs {
            if rig.id.trim().is_empty() {
                return Err(ConfigError::Invalid("rig id"));
            }
            if !ids.insert(rig.id.to_ascii_uppercase()) {
                return Err(ConfigError::DuplicateRigId(rig.id.clone()));
            }
            // Port 0 asks the OS for any free port, it can never clash
            if rig.port != 0 && !ports.insert(rig.port) {
                return Err(ConfigError::DuplicatePort(rig.port));
            }
        }
        if self.snapshot_interval_ms == 0 {
            return Err(ConfigError::Invalid("snapshot_interval_ms"));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid("broadcast_capacity"));
        }
        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms {
            return Err(ConfigError::Invalid("backoff"));
        }
        Ok(())
    }

    pub fn rig(&self, id: &str) -> Option<&RigConfig> {
        self.rigs.iter().find(|rig| rig.id.eq_ignore_ascii_case(id))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn receiving_window(&self) -> Duration {
        Duration::from_millis(self.receiving_window_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name: name.to_string(),
        value: value.to_string(),
    })
}
