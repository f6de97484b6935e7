//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. An explicit `--config` path
//! 2. `provenance.toml` next to the executable
//! 3. `$HOME/.config/provenance/config.toml`
//! 4. Built-in defaults
//!
//! Environment variables (`PROVENANCE_STATE`, `PROVENANCE_LOG_LEVEL`) override
//! file values; CLI arguments override both.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::env::Amount;
use crate::error::{Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub batches: BatchLimits,
    pub shipments: ShipmentLimits,
    pub transfers: TransferLimits,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON snapshot the CLI loads and saves around every command.
    pub state: PathBuf,
    pub report_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines log file.  Empty string means no file logging.
    pub json_log_file: String,
    pub json_stdout: bool,
}

/// Initial registration fee and batch capacity.  Only read at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub fee: Amount,
    pub capacity: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShipmentLimits {
    pub fee: Amount,
    pub capacity: u64,
    /// Distinct approvals needed to move a shipment to in-transit.
    pub quorum: usize,
    /// Approver slots per shipment.
    pub max_approvers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransferLimits {
    pub fee: Amount,
    pub capacity: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state: PathBuf::from("provenance-state.json"),
            report_dir: PathBuf::from("provenance-reports"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            fee: 500,
            capacity: 5_000,
        }
    }
}

impl Default for ShipmentLimits {
    fn default() -> Self {
        Self {
            fee: 200,
            capacity: 10_000,
            quorum: 2,
            max_approvers: 10,
        }
    }
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            fee: 300,
            capacity: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ProvenanceConfig {
    /// Parse a TOML document, filling every missing key with its default.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).ctx_config("parse config TOML")
    }

    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        Self::from_toml(&text)
    }

    /// Load config using the standard search order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("provenance.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        if let Some(home) = std::env::var_os("HOME") {
            let candidate = PathBuf::from(home)
                .join(".config")
                .join("provenance")
                .join("config.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(state) = std::env::var("PROVENANCE_STATE") {
            self.paths.state = PathBuf::from(state);
        }
        if let Ok(level) = std::env::var("PROVENANCE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}
