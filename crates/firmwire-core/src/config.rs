//! Configuration system for Firmwire.
//!
//! Resolution order: environment variables → config file → defaults.
//! Command-line flags in the binaries are applied on top of the result.
//!
//! Config file location:
//!   1. $FIRMWIRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/firmwire/config.toml
//!   3. ~/.config/firmwire/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::wire::{Qos, DEFAULT_FIRMWARE_TOPIC};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwireConfig {
    pub session: SessionConfig,
    pub firmware: FirmwareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Local UDP address the relay adapter listens on.
    pub bind: String,
    /// Relay to subscribe with and keep alive. Empty = passive listener.
    pub broker: String,
    pub client_id: String,
    /// Longest gap between keep-alive pings sent to the relay. 0 = ping only
    /// when a wait times out.
    pub keep_alive_secs: u16,
    /// How long one wait for an inbound frame may block.
    pub cmd_timeout_ms: u32,
    /// Leave the session loop after the first wait cycle.
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    /// Topic firmware envelopes are published on.
    pub topic: String,
    /// Where verified firmware is written.
    pub save_as: PathBuf,
    /// Subscription QoS, 0..=2.
    pub qos: u8,
    /// Largest transfer the daemon will allocate a buffer for.
    pub max_transfer_bytes: u32,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

/// Default subscription QoS: exactly once.
pub const DEFAULT_QOS: u8 = 2;

/// Default allocation cap for one transfer: 16 MiB.
pub const DEFAULT_MAX_TRANSFER_BYTES: u32 = 16 * 1024 * 1024;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:18830".to_string(),
            broker: String::new(),
            client_id: "FirmwireClient".to_string(),
            keep_alive_secs: 60,
            cmd_timeout_ms: 30_000,
            test_mode: false,
        }
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_FIRMWARE_TOPIC.to_string(),
            save_as: PathBuf::from("firmware.bin"),
            qos: DEFAULT_QOS,
            max_transfer_bytes: DEFAULT_MAX_TRANSFER_BYTES,
        }
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────────

fn default_config_path() -> PathBuf {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join(".config"),
    };
    base.join("firmwire").join("config.toml")
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot write config {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize default config")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),
    #[error("firmware topic must not be empty")]
    EmptyTopic,
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl FirmwireConfig {
    /// Load from [`FirmwireConfig::file_path`], then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path. A missing file means all defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`FirmwireConfig::load_from`] with overrides read through `var`.
    fn load_with(path: &Path, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config: FirmwireConfig = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FirmwireConfig::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.apply_env_overrides(var);
        config.validate()?;
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var_os("FIRMWIRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path)
    }

    /// Seed the config file with defaults unless it already exists.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if path.exists() {
            return Ok(path);
        }
        let write_err = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = toml::to_string_pretty(&FirmwireConfig::default())?;
        std::fs::write(&path, text).map_err(write_err)?;
        Ok(path)
    }

    /// Subscription QoS as a wire value.
    pub fn qos(&self) -> Result<Qos, ConfigError> {
        Qos::try_from(self.firmware.qos).map_err(|_| ConfigError::InvalidQos(self.firmware.qos))
    }

    /// Reject values no transfer could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.qos()?;
        if self.firmware.topic.is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        Ok(())
    }

    /// `FIRMWIRE_<SECTION>__<KEY>` overrides. Unparsable values are skipped.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FIRMWIRE_SESSION__BIND") {
            self.session.bind = v;
        }
        if let Some(v) = var("FIRMWIRE_SESSION__BROKER") {
            self.session.broker = v;
        }
        if let Some(v) = var("FIRMWIRE_FIRMWARE__TOPIC") {
            self.firmware.topic = v;
        }
        if let Some(v) = var("FIRMWIRE_FIRMWARE__SAVE_AS") {
            self.firmware.save_as = PathBuf::from(v);
        }
        if let Some(q) = var("FIRMWIRE_FIRMWARE__QOS").and_then(|v| v.parse().ok()) {
            self.firmware.qos = q;
        }
    }
}
