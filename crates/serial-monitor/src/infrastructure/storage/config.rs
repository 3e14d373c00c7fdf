//! TOML configuration for the serial monitor.
//!
//! ```toml
//! [monitor]
//! log_level = "info"
//! scan_interval_ms = 1000
//! close_wait_ms = 2
//!
//! [defaults]
//! baud_rate = 250000
//! capacity = 1024
//! read_timeout_ms = 50
//!
//! [[ports]]
//! name = "/dev/ttyUSB0"
//! baud_rate = 115200
//! header = "FF00"
//! expected_size = 0
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = ...)]` fallback, so an empty file
//! (or no file at all) yields a working configuration.  Delimiters are
//! written as hex strings; an empty `header` means raw passthrough.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serial_core::FrameDelimiters;
use thiserror::Error;

use crate::application::port_session::{PortSettings, DEFAULT_BAUD_RATE};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The TOML parsed but describes an unusable setup.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub defaults: PortDefaults,
    /// Per-port framing profiles.
    #[serde(default)]
    pub ports: Vec<PortProfile>,
}

/// Process-wide behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    /// Applied by `MonitorService::system`; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Period of the enumeration and throughput tick.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Pause after releasing a port handle before it may be reopened.
    #[serde(default = "default_close_wait_ms")]
    pub close_wait_ms: u64,
}

/// Settings applied to ports without a profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortDefaults {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Framing profile for one named port.  Unset fields fall back to
/// [`PortDefaults`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(default, with = "hex_bytes")]
    pub header: Vec<u8>,
    #[serde(default, with = "hex_bytes")]
    pub footer: Vec<u8>,
    #[serde(default)]
    pub expected_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_scan_interval_ms() -> u64 {
    1000
}
fn default_close_wait_ms() -> u64 {
    2
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_capacity() -> usize {
    serial_core::DEFAULT_CAPACITY
}
fn default_read_timeout_ms() -> u64 {
    50
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scan_interval_ms: default_scan_interval_ms(),
            close_wait_ms: default_close_wait_ms(),
        }
    }
}

impl Default for PortDefaults {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            capacity: default_capacity(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(&compact).map_err(|e| D::Error::custom(format!("bad hex {text:?}: {e}")))
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

impl MonitorConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for values that parse but cannot be used.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: MonitorConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads the config at `path`, returning the defaults if the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", plus anything [`from_toml_str`](Self::from_toml_str) returns.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Rejects values no session could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.scan_interval_ms == 0 {
            return Err(ConfigError::Invalid("scan_interval_ms must be positive".into()));
        }
        if self.defaults.capacity == 0 {
            return Err(ConfigError::Invalid("defaults.capacity must be positive".into()));
        }
        if self.defaults.baud_rate == 0 {
            return Err(ConfigError::Invalid("defaults.baud_rate must be positive".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for profile in &self.ports {
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "port {} has more than one profile",
                    profile.name
                )));
            }
            if profile.capacity == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "port {}: capacity must be positive",
                    profile.name
                )));
            }
            if profile.baud_rate == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "port {}: baud_rate must be positive",
                    profile.name
                )));
            }
            if profile.header.is_empty() && !profile.footer.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "port {}: a footer needs a header",
                    profile.name
                )));
            }
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.scan_interval_ms)
    }

    pub fn close_wait(&self) -> Duration {
        Duration::from_millis(self.monitor.close_wait_ms)
    }

    pub fn profile(&self, name: &str) -> Option<&PortProfile> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Settings for `name`: its profile if one exists, otherwise the
    /// defaults with raw framing.
    pub fn settings_for(&self, name: &str) -> PortSettings {
        let d = &self.defaults;
        let base = PortSettings {
            baud_rate: d.baud_rate,
            read_timeout: Duration::from_millis(d.read_timeout_ms),
            delimiters: FrameDelimiters::raw(),
            capacity: d.capacity,
        };
        let Some(profile) = self.profile(name) else {
            return base;
        };

        let delimiters = if profile.footer.is_empty() {
            FrameDelimiters::header_only(profile.header.clone(), profile.expected_size)
        } else {
            FrameDelimiters::header_footer(profile.header.clone(), profile.footer.clone())
        };
        PortSettings {
            baud_rate: profile.baud_rate.unwrap_or(base.baud_rate),
            read_timeout: profile
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.read_timeout),
            delimiters,
            capacity: profile.capacity.unwrap_or(base.capacity),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
