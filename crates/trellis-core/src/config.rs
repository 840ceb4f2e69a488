//! Configuration system for Trellis devices.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TRELLIS_CONFIG (explicit override)
//!   2. /storage/trellis.toml (the mounted storage partition)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration. One file serves both devices; each reads its
/// own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    pub shears: ShearsConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShearsConfig {
    /// Mounted storage partition. Requested basenames resolve under this
    /// prefix; the CSV log lives here too.
    pub storage_dir: PathBuf,
    /// CSV log basename within `storage_dir`.
    pub log_file: String,
    /// GPS UART baud rate. Receivers ship at 9600; ours is reflashed.
    pub gps_baud: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Host serial link baud rate.
    pub serial_baud: u32,
    /// Frames the uplink queue holds before `send` blocks the caller.
    pub uplink_queue_frames: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ShearsConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("/storage"),
            log_file: "gps_points.csv".to_string(),
            gps_baud: 115_200,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            serial_baud: 115_200,
            uplink_queue_frames: 8,
        }
    }
}

impl ShearsConfig {
    /// Full path of the CSV log.
    pub fn log_path(&self) -> PathBuf {
        self.storage_dir.join(&self.log_file)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TrellisConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TrellisConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TRELLIS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/storage/trellis.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TrellisConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TRELLIS_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TRELLIS_SHEARS__STORAGE_DIR") {
            self.shears.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TRELLIS_SHEARS__LOG_FILE") {
            self.shears.log_file = v;
        }
        if let Ok(v) = std::env::var("TRELLIS_SHEARS__GPS_BAUD") {
            if let Ok(b) = v.parse() {
                self.shears.gps_baud = b;
            }
        }
        if let Ok(v) = std::env::var("TRELLIS_HUB__SERIAL_BAUD") {
            if let Ok(b) = v.parse() {
                self.hub.serial_baud = b;
            }
        }
        if let Ok(v) = std::env::var("TRELLIS_HUB__UPLINK_QUEUE_FRAMES") {
            if let Ok(n) = v.parse() {
                self.hub.uplink_queue_frames = n;
            }
        }
    }
}
