//! TOML configuration for the device simulator.
//!
//! Looked up at `--config <path>` or, by default, in the platform config
//! directory:
//! - Windows:  `%APPDATA%\catlink\catlink-device.toml`
//! - Linux:    `~/.config/catlink/catlink-device.toml`
//! - macOS:    `~/Library/Application Support/catlink/catlink-device.toml`
//!
//! Every key is optional:
//!
//! ```toml
//! log_level = "debug"
//!
//! [device]
//! name = "esp32"
//! capabilities = 0x37
//! triggers = ["lol", "meme_surprise"]
//!
//! [link]
//! listen_address = "127.0.0.1:7878"
//! overflow_policy = "evict_oldest"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use catlink_core::protocol::framer::OverflowPolicy;
use catlink_core::protocol::messages::{DEFAULT_DEVICE_NAME, DEFAULT_FIRMWARE, PROTOCOL_VERSION};
use catlink_core::{CapabilitySet, DeviceIdentity, ProtocolVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::device_session::SessionConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub device: IdentityConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

/// What the simulated device announces and can render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_firmware")]
    pub firmware: String,
    #[serde(default = "default_capabilities")]
    pub capabilities: CapabilitySet,
    #[serde(default = "default_protocol_major")]
    pub protocol_major: u8,
    #[serde(default = "default_protocol_minor")]
    pub protocol_minor: u8,
    /// Trigger ids the display can play; empty accepts any id.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
    /// How long a trigger animation keeps the display busy.
    #[serde(default)]
    pub animation_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Sleep between cooperative passes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}
fn default_firmware() -> String {
    DEFAULT_FIRMWARE.to_string()
}
fn default_capabilities() -> CapabilitySet {
    CapabilitySet::REFERENCE_DEVICE
}
fn default_protocol_major() -> u8 {
    PROTOCOL_VERSION.major
}
fn default_protocol_minor() -> u8 {
    PROTOCOL_VERSION.minor
}
fn default_triggers() -> Vec<String> {
    ["lol", "meme_surprise", "facepalm"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_listen_address() -> String {
    "127.0.0.1:7878".to_string()
}
fn default_poll_interval_ms() -> u64 {
    5
}
fn default_hello_timeout_ms() -> u64 {
    catlink_core::domain::timers::DEVICE_HELLO_TIMEOUT.as_millis() as u64
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device: IdentityConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            firmware: default_firmware(),
            capabilities: default_capabilities(),
            protocol_major: default_protocol_major(),
            protocol_minor: default_protocol_minor(),
            triggers: default_triggers(),
            animation_ms: 0,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            poll_interval_ms: default_poll_interval_ms(),
            hello_timeout_ms: default_hello_timeout_ms(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl DeviceConfig {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            version: ProtocolVersion::new(self.device.protocol_major, self.device.protocol_minor),
            caps: self.device.capabilities,
            name: self.device.name.clone(),
            firmware: self.device.firmware.clone(),
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            identity: self.identity(),
            hello_timeout: Duration::from_millis(self.link.hello_timeout_ms),
            overflow_policy: self.link.overflow_policy,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.link.poll_interval_ms.max(1))
    }

    pub fn animation(&self) -> Duration {
        Duration::from_millis(self.device.animation_ms)
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Default config file location.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform base
/// directory cannot be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("catlink-device.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path` (or the default location), falling back to
/// [`DeviceConfig::default`] when the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<DeviceConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
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
