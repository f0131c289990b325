//! TOML configuration for the host application.
//!
//! Read from `--config <path>` or the platform-appropriate file:
//! - Windows:  `%APPDATA%\catlink\catlink-host.toml`
//! - Linux:    `~/.config/catlink/catlink-host.toml`
//! - macOS:    `~/Library/Application Support/catlink/catlink-host.toml`
//!
//! # What is TOML? (for beginners)
//!
//! TOML is a configuration format that reads like an INI file with types:
//!
//! ```toml
//! [link]
//! transport = "serial"
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [protocol]
//! app_name = "bongo_cat_app"
//! hello_timeout_ms = 800
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a missing file,
//! a missing section or a missing key all fall back to the protocol's
//! standard timings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use catlink_core::protocol::messages::DEFAULT_APP_NAME;
use catlink_core::{CapabilitySet, TimerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::link::LinkSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

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

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which byte stream to open.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Serial,
    /// The `catlink-device` simulator.
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    #[serde(default)]
    pub transport: Transport,
    /// Serial port path.
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Simulator address, used with `transport = "tcp"`.
    #[serde(default = "default_address")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// Announced as `NAME=` in `HELLO`.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Announced as `REQCAP=` in `HELLO`.
    #[serde(default = "default_req_cap")]
    pub req_cap: CapabilitySet,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_hello_attempts")]
    pub hello_attempts: u8,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_stale_quiet_ms")]
    pub stale_quiet_ms: u64,
    /// Timer resolution of the link task.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> String {
    if cfg!(target_os = "windows") {
        "COM3".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_address() -> String {
    "127.0.0.1:7878".to_string()
}
fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}
fn default_req_cap() -> CapabilitySet {
    CapabilitySet::ALL
}
fn default_hello_timeout_ms() -> u64 {
    TimerConfig::default().hello_timeout_ms
}
fn default_hello_attempts() -> u8 {
    TimerConfig::default().hello_attempts
}
fn default_request_timeout_ms() -> u64 {
    TimerConfig::default().request_timeout_ms
}
fn default_stale_quiet_ms() -> u64 {
    TimerConfig::default().stale_quiet_ms
}
fn default_tick_ms() -> u64 {
    20
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            port: default_port(),
            baud_rate: default_baud_rate(),
            address: default_address(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            req_cap: default_req_cap(),
            hello_timeout_ms: default_hello_timeout_ms(),
            hello_attempts: default_hello_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            stale_quiet_ms: default_stale_quiet_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl ProtocolConfig {
    pub fn timers(&self) -> TimerConfig {
        TimerConfig {
            hello_timeout_ms: self.hello_timeout_ms,
            hello_attempts: self.hello_attempts,
            request_timeout_ms: self.request_timeout_ms,
            stale_quiet_ms: self.stale_quiet_ms,
        }
    }
}

impl HostConfig {
    /// Settings for [`HostLink::spawn`](crate::infrastructure::link::HostLink::spawn).
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            app_name: self.protocol.app_name.clone(),
            req_caps: self.protocol.req_cap,
            timers: self.protocol.timers(),
            tick: Duration::from_millis(self.protocol.tick_ms.max(1)),
        }
    }

    /// Port path or address, whichever the transport uses.
    pub fn endpoint(&self) -> &str {
        match self.link.transport {
            Transport::Serial => &self.link.port,
            Transport::Tcp => &self.link.address,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("catlink-host.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path` (or the default location), returning
/// `HostConfig::default()` if the file does not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<HostConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path` (or the default location), creating the
/// directory if needed.  Returns the path written.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("catlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("catlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("catlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
